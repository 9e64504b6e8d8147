//! Convenience re-exports for common TypeHaus usage
//!
//! # Example
//!
//! ```rust
//! use typehaus::prelude::*;
//!
//! let mut registry = Registry::new();
//! registry
//!     .define(EntityBuilder::new("tag").field(FieldDescriptor::string("name")).build().unwrap())
//!     .unwrap();
//! ```

// Core TypeHaus components
pub use crate::core::TypeHaus;
pub use crate::errors::TypeHausError;
pub use crate::migration::create_table_statements;

// Re-export centralized config
pub use config::{AppConfig, CacheBackend, CacheConfig, DatabaseConfig, LazyPolicy, OrmConfig};

// Schema, sessions, queries and results
pub use store_object::prelude::*;

// Signals
pub use signal_system::prelude::*;

// Cache stores and statistics
pub use cache_system::{CacheStats, CacheStore, RedisCacheStore};
pub use store_object::TableCacheStore;

// Common external dependencies
pub use anyhow;
pub use sqlx;
pub use tokio;
