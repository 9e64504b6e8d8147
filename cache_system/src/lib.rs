//! Cache system for query results and memoized function results
//!
//! This crate provides the cache store abstraction, the digest used as cache key,
//! expiry handling, the task-local dependency scope and a Redis-backed store.

pub mod digest;
pub mod errors;
pub mod expiry;
pub mod manager;
pub mod params;
pub mod prelude;
pub mod store;
pub mod tracker;

// Re-export centralized config
pub use config::{CacheBackend, CacheConfig};

pub use digest::{digest, function_key};
pub use errors::CacheError;
pub use expiry::Expiry;
pub use manager::RedisCacheStore;
pub use params::CacheParams;
pub use store::{CacheEntry, CacheStats, CacheStatus, CacheStore, Dependency, DependencySet, EntryCounts};
pub use tracker::DependencyScope;
