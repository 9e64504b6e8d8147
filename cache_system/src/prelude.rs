//! Convenience re-exports for common cache-system usage

pub use crate::digest::{digest, function_key};
pub use crate::errors::CacheError;
pub use crate::expiry::Expiry;
pub use crate::manager::RedisCacheStore;
pub use crate::params::CacheParams;
pub use crate::store::{CacheEntry, CacheStats, CacheStatus, CacheStore, Dependency, DependencySet};
pub use crate::tracker::DependencyScope;

// Re-export centralized config
pub use config::{CacheBackend, CacheConfig};

// Common external dependencies
pub use async_trait::async_trait;
