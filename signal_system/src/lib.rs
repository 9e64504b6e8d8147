//! Signal system for database event handling
//!
//! This crate provides the before/after hooks fired around inserts, updates,
//! deletes and selects in the typehaus ecosystem.

pub mod event;
pub mod manager;
pub mod prelude;
pub mod types;

pub use event::{DatabaseEvent, EventPhase, EventType};
pub use manager::{CallbackId, SignalManager};
pub use types::{EventCallback, EventProcessingError};
