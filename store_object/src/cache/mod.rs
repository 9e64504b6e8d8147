//! Cache stores and memoization on top of a session

pub mod memoize;
pub mod table_store;

pub use memoize::{memoize, memoize_named};
pub use table_store::TableCacheStore;

use crate::engine::Engine;
use crate::errors::DalError;
use cache_system::{CacheBackend, CacheConfig, CacheParams, RedisCacheStore};
use std::sync::Arc;

/// Open the configured cache backend. The table backend lives in the engine's
/// database, so its tables are defined (or attached) here.
pub async fn open_store(
    config: &CacheConfig,
    engine: Arc<dyn Engine>,
    migrate: bool,
) -> Result<CacheParams, DalError> {
    let store: Arc<dyn cache_system::CacheStore> = match config.backend {
        CacheBackend::Table => Arc::new(TableCacheStore::install(engine, migrate).await?),
        CacheBackend::Redis => Arc::new(RedisCacheStore::new(config)?),
    };
    tracing::info!("Cache backend: {:?}", config.backend);
    Ok(CacheParams::new(store, config.default_ttl_seconds))
}
