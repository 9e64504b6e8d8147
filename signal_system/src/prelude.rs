//! Convenience re-exports for common signal-system usage

pub use crate::event::{DatabaseEvent, EventPhase, EventType};
pub use crate::manager::{CallbackId, SignalManager};
pub use crate::types::{EventCallback, EventProcessingError};

// Common external dependencies
pub use futures::future::BoxFuture;
pub use futures::FutureExt;
