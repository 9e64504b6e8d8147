//! Type definitions for signal system
//!
//! This module contains the callback signature and the error raised
//! when a callback fails.

use crate::event::DatabaseEvent;
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

/// Async event callback type that returns a Result
pub type EventCallback =
    Arc<dyn Fn(DatabaseEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Event processing error
#[derive(Debug, Error)]
#[error("{phase} {event_type} callback #{callback_index} on '{table_name}' failed: {error}")]
pub struct EventProcessingError {
    pub callback_index: usize,
    pub table_name: String,
    pub event_type: String,
    pub phase: String,
    #[source]
    pub error: anyhow::Error,
}
