//! Core TypeHaus functionality
//!
//! This module contains the main TypeHaus struct, which assembles the engine, the
//! signal manager, the cache store and the finalized registry into one session.

use std::sync::Arc;

use config::AppConfig;
use signal_system::SignalManager;
use store_object::cache::open_store;
use store_object::{Dal, DalOptions, Engine, PgEngine, QueryBuilder, Registry, Table};

use crate::errors::TypeHausError;

/// Main TypeHaus coordinator that owns a session and the pieces it was built from
pub struct TypeHaus {
    dal: Arc<Dal>,
    config: AppConfig,
    postgres: Option<Arc<PgEngine>>,
}

impl std::fmt::Debug for TypeHaus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeHaus")
            .field("dal", &self.dal)
            .field("orm", &self.config.orm)
            .finish()
    }
}

impl TypeHaus {
    /// Connect to PostgreSQL and open a session over `registry`
    pub async fn connect(config: AppConfig, registry: Registry) -> Result<Self, TypeHausError> {
        let engine = Arc::new(PgEngine::connect(&config.database).await?);
        let mut typehaus = Self::open(engine.clone(), registry, config).await?;
        typehaus.postgres = Some(engine);
        Ok(typehaus)
    }

    /// Open a session over any engine, following the ORM and cache sections of `config`
    pub async fn open(
        engine: Arc<dyn Engine>,
        registry: Registry,
        config: AppConfig,
    ) -> Result<Self, TypeHausError> {
        let signals = Arc::new(SignalManager::new());
        let mut options = DalOptions::from_config(&config.orm);
        if config.orm.caching {
            let cache = open_store(&config.cache, engine.clone(), config.orm.migrate).await?;
            options = options.with_cache(cache);
        }

        let dal = Dal::open(engine, registry, signals, options).await?;
        tracing::info!(
            "TypeHaus session ready on {} ({} entities, caching {})",
            dal.engine().name(),
            dal.registry().names().count(),
            if config.orm.caching { "on" } else { "off" }
        );
        Ok(Self {
            dal,
            config,
            postgres: None,
        })
    }

    pub fn dal(&self) -> &Arc<Dal> {
        &self.dal
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn signals(&self) -> &Arc<SignalManager> {
        self.dal.signals()
    }

    pub fn table(&self, name: &str) -> Result<Table, TypeHausError> {
        Ok(self.dal.table(name)?)
    }

    pub fn query(&self, name: &str) -> Result<QueryBuilder, TypeHausError> {
        Ok(self.dal.query(name)?)
    }

    /// Check database connection health
    pub async fn health_check(&self) -> Result<(), TypeHausError> {
        match &self.postgres {
            Some(engine) => Ok(engine.ping().await?),
            None => Err(TypeHausError::NoHealthCheck(self.dal.engine().name())),
        }
    }
}
