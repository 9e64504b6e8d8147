//! Redis-backed cache store
//!
//! This module provides the RedisCacheStore struct for keeping cache entries
//! and their dependency links in Redis.
//!
//! Layout under the configured prefix:
//! - `{prefix}:entry:{key}` entry JSON, with a native Redis expiry when the entry has one
//! - `{prefix}:deps:{key}` set of `table:id` rows the entry depends on
//! - `{prefix}:dep:{table}:{id}` set of entry keys depending on that row
//! - `{prefix}:table:{table}` set of entry keys depending on any row of the table
//! - `{prefix}:entries` set of all entry keys

use crate::errors::CacheError;
use crate::store::{CacheEntry, CacheStats, CacheStore, Dependency, DependencySet};
use async_trait::async_trait;
use chrono::Utc;
use config::CacheConfig;
use redis::{AsyncCommands, Client};
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Redis-based cache store
#[derive(Clone)]
pub struct RedisCacheStore {
    client: Arc<Client>,
    prefix: String,
    connection_pool: Arc<RwLock<Option<redis::aio::MultiplexedConnection>>>,
}

impl Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let connection_status = {
            match self.connection_pool.try_read() {
                Ok(pool) => {
                    if pool.is_some() {
                        "connected"
                    } else {
                        "no_connection"
                    }
                }
                Err(_) => "lock_error",
            }
        };

        f.debug_struct("RedisCacheStore")
            .field("prefix", &self.prefix)
            .field("connected", &connection_status)
            .finish()
    }
}

impl RedisCacheStore {
    /// Create a new store from the cache configuration
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let url = config
            .redis_url
            .as_deref()
            .ok_or_else(|| CacheError::Connection("redis_url is not configured".into()))?;
        let client = Client::open(url)?;

        Ok(Self {
            client: Arc::new(client),
            prefix: config.key_prefix.clone(),
            connection_pool: Arc::new(RwLock::new(None)),
        })
    }

    /// Get or create Redis connection
    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        let mut pool = self.connection_pool.write().await;

        if pool.is_none() {
            let connection = self.client.get_multiplexed_async_connection().await?;
            *pool = Some(connection);
        }

        Ok(pool
            .as_ref()
            .ok_or_else(|| CacheError::Connection("Failed to get connection from pool".into()))?
            .clone())
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}:entry:{}", self.prefix, key)
    }

    fn deps_key(&self, key: &str) -> String {
        format!("{}:deps:{}", self.prefix, key)
    }

    fn row_key(&self, table: &str, id: i64) -> String {
        format!("{}:dep:{}:{}", self.prefix, table, id)
    }

    fn table_key(&self, table: &str) -> String {
        format!("{}:table:{}", self.prefix, table)
    }

    fn entries_key(&self) -> String {
        format!("{}:entries", self.prefix)
    }

    fn encode_dependency(dependency: &Dependency) -> String {
        format!("{}:{}", dependency.table, dependency.id)
    }

    fn decode_dependency(text: &str) -> Option<Dependency> {
        let (table, id) = text.rsplit_once(':')?;
        Some(Dependency::new(table, id.parse().ok()?))
    }

    /// Remove entries and every link pointing at them
    async fn remove_entries(&self, keys: &BTreeSet<String>) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_connection().await?;
        let mut removed = 0u64;

        for key in keys {
            let members: Vec<String> = conn.smembers(self.deps_key(key)).await?;
            let mut pipe = redis::pipe();
            pipe.atomic();
            for member in &members {
                if let Some(dependency) = Self::decode_dependency(member) {
                    pipe.srem(self.row_key(&dependency.table, dependency.id), key)
                        .ignore();
                    pipe.srem(self.table_key(&dependency.table), key).ignore();
                }
            }
            pipe.del(self.deps_key(key)).ignore();
            pipe.srem(self.entries_key(), key).ignore();
            pipe.del(self.entry_key(key));
            let (deleted,): (i64,) = pipe.query_async(&mut conn).await?;
            removed += u64::try_from(deleted).unwrap_or(0);
        }

        Ok(removed)
    }

    async fn all_keys(&self) -> Result<BTreeSet<String>, CacheError> {
        let mut conn = self.get_connection().await?;
        let keys: BTreeSet<String> = conn.smembers(self.entries_key()).await?;
        Ok(keys)
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<String, CacheError> {
        let mut conn = self.get_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong)
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.get_connection().await?;
        let cached: Option<String> = conn.get(self.entry_key(key)).await?;

        let Some(json_str) = cached else {
            // Entry expired natively; drop whatever links it left behind
            let dangling: bool = conn.sismember(self.entries_key(), key).await?;
            if dangling {
                self.remove_entries(&BTreeSet::from([key.to_string()])).await?;
            }
            return Ok(None);
        };

        let mut entry: CacheEntry = serde_json::from_str(&json_str)?;
        if entry.is_expired(Utc::now()) {
            self.remove_entries(&BTreeSet::from([key.to_string()])).await?;
            return Ok(None);
        }

        let members: Vec<String> = conn.smembers(self.deps_key(key)).await?;
        entry.dependencies = members
            .iter()
            .filter_map(|member| Self::decode_dependency(member))
            .collect();
        Ok(Some(entry))
    }

    async fn save(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        // Links are rebuilt from scratch for the key
        self.remove_entries(&BTreeSet::from([entry.key.clone()])).await?;

        let stored = CacheEntry {
            dependencies: DependencySet::new(),
            ..entry.clone()
        };
        let json_str = serde_json::to_string(&stored)?;
        let mut conn = self.get_connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        match entry.expires_at {
            Some(at) => {
                let seconds = (at - Utc::now()).num_seconds().max(1);
                pipe.set_ex(self.entry_key(&entry.key), &json_str, seconds as u64)
                    .ignore();
            }
            None => {
                pipe.set(self.entry_key(&entry.key), &json_str).ignore();
            }
        }
        pipe.sadd(self.entries_key(), &entry.key).ignore();
        for dependency in &entry.dependencies {
            pipe.sadd(self.deps_key(&entry.key), Self::encode_dependency(dependency))
                .ignore();
            pipe.sadd(self.row_key(&dependency.table, dependency.id), &entry.key)
                .ignore();
            pipe.sadd(self.table_key(&dependency.table), &entry.key)
                .ignore();
        }

        let written: Result<(), redis::RedisError> = pipe.query_async(&mut conn).await;
        if let Err(err) = written {
            // Never leave an entry whose links are missing
            self.remove_entries(&BTreeSet::from([entry.key.clone()])).await?;
            return Err(err.into());
        }
        Ok(())
    }

    async fn invalidate(&self, table: &str, ids: &[i64]) -> Result<u64, CacheError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_connection().await?;
        let mut keys = BTreeSet::new();
        for id in ids {
            let dependents: Vec<String> = conn.smembers(self.row_key(table, *id)).await?;
            keys.extend(dependents);
        }
        self.remove_entries(&keys).await
    }

    async fn clear_all(&self) -> Result<u64, CacheError> {
        let keys = self.all_keys().await?;
        self.remove_entries(&keys).await
    }

    async fn clear_expired(&self) -> Result<u64, CacheError> {
        let keys = self.all_keys().await?;
        let mut conn = self.get_connection().await?;
        let mut expired = BTreeSet::new();
        for key in keys {
            let exists: bool = conn.exists(self.entry_key(&key)).await?;
            if !exists {
                expired.insert(key);
            }
        }
        // Redis already dropped the payloads; this removes their links
        self.remove_entries(&expired).await?;
        Ok(expired.len() as u64)
    }

    async fn clear_table(&self, table: &str) -> Result<u64, CacheError> {
        let mut conn = self.get_connection().await?;
        let keys: BTreeSet<String> = conn.smembers(self.table_key(table)).await?;
        self.remove_entries(&keys).await
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let keys = self.all_keys().await?;
        let mut conn = self.get_connection().await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let cached: Option<String> = conn.get(self.entry_key(&key)).await?;
            let members: Vec<String> = conn.smembers(self.deps_key(&key)).await?;
            let dependencies: DependencySet = members
                .iter()
                .filter_map(|member| Self::decode_dependency(member))
                .collect();
            let entry = match cached {
                Some(json_str) => {
                    let mut entry: CacheEntry = serde_json::from_str(&json_str)?;
                    entry.dependencies = dependencies;
                    entry
                }
                // Payload expired natively but links are still around
                None => CacheEntry {
                    key: key.clone(),
                    payload: String::new(),
                    cached_at: Utc::now(),
                    expires_at: Some(Utc::now()),
                    dependencies,
                },
            };
            entries.push(entry);
        }
        Ok(CacheStats::from_entries(&entries, Utc::now()))
    }
}
