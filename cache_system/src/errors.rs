//! Error types for cache operations
//!
//! This module defines all error types that can occur
//! during cache operations and store interactions.

use thiserror::Error;

/// Cache system errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    ConnectionError(#[from] redis::RedisError),

    #[error("Connection pool error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid expiry: {0}")]
    InvalidExpiry(String),

    #[error("Cache is disabled")]
    Disabled,

    #[error("Cache store error: {0}")]
    Store(String),
}
