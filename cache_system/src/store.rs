//! Cache store abstraction
//!
//! One store backs both query caching and function memoization. Entries carry
//! the `(table, id)` rows they were computed from so writes can invalidate them.

use crate::errors::CacheError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug};

/// A row a cached value was computed from
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub table: String,
    pub id: i64,
}

impl Dependency {
    pub fn new(table: &str, id: i64) -> Self {
        Self {
            table: table.to_string(),
            id,
        }
    }
}

pub type DependencySet = BTreeSet<Dependency>;

/// Whether a value was computed by this call or served from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Fresh,
    Cached,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStatus::Fresh => f.write_str("fresh"),
            CacheStatus::Cached => f.write_str("cached"),
        }
    }
}

/// A cached payload and its bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Serialized value
    pub payload: String,
    pub cached_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub dependencies: DependencySet,
}

impl CacheEntry {
    pub fn new(
        key: String,
        payload: String,
        expires_at: Option<DateTime<Utc>>,
        dependencies: DependencySet,
    ) -> Self {
        Self {
            key,
            payload,
            cached_at: Utc::now(),
            expires_at,
            dependencies,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Entry counts split by expiry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntryCounts {
    pub total: u64,
    pub valid: u64,
    pub expired: u64,
}

impl EntryCounts {
    pub fn count(&mut self, expired: bool) {
        self.total += 1;
        if expired {
            self.expired += 1;
        } else {
            self.valid += 1;
        }
    }
}

/// Snapshot of what the store holds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: EntryCounts,
    /// Entries depending on at least one row of each table
    pub tables: BTreeMap<String, EntryCounts>,
    /// Number of dependency links per table
    pub dependency_links: BTreeMap<String, u64>,
}

impl CacheStats {
    /// Build statistics from entries and their dependency sets
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a CacheEntry>, now: DateTime<Utc>) -> Self {
        let mut stats = CacheStats::default();
        for entry in entries {
            let expired = entry.is_expired(now);
            stats.entries.count(expired);
            let tables: BTreeSet<&str> = entry.dependencies.iter().map(|d| d.table.as_str()).collect();
            for table in tables {
                stats.tables.entry(table.to_string()).or_default().count(expired);
            }
            for dependency in &entry.dependencies {
                *stats.dependency_links.entry(dependency.table.clone()).or_default() += 1;
            }
        }
        stats
    }
}

/// Persistent store for cache entries
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Look an entry up. Expired entries are removed and reported as a miss.
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Persist an entry and its dependency links, replacing any entry with the same key.
    /// A failed link write must not leave the entry behind.
    async fn save(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Remove every entry depending on one of `ids` in `table`. Returns the number removed.
    async fn invalidate(&self, table: &str, ids: &[i64]) -> Result<u64, CacheError>;

    async fn clear_all(&self) -> Result<u64, CacheError>;

    async fn clear_expired(&self) -> Result<u64, CacheError>;

    /// Remove every entry depending on any row of `table`
    async fn clear_table(&self, table: &str) -> Result<u64, CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, deps: &[(&str, i64)], expires_at: Option<DateTime<Utc>>) -> CacheEntry {
        CacheEntry::new(
            key.to_string(),
            "[]".to_string(),
            expires_at,
            deps.iter().map(|(t, id)| Dependency::new(t, *id)).collect(),
        )
    }

    #[test]
    fn test_expiry_check() {
        let now = Utc::now();
        assert!(!entry("a", &[], None).is_expired(now));
        assert!(entry("a", &[], Some(now - chrono::Duration::seconds(1))).is_expired(now));
    }

    #[test]
    fn test_stats_from_entries() {
        let now = Utc::now();
        let past = Some(now - chrono::Duration::seconds(10));
        let entries = vec![
            entry("a", &[("person", 1), ("person", 2), ("post", 7)], None),
            entry("b", &[("person", 1)], past),
        ];
        let stats = CacheStats::from_entries(&entries, now);
        assert_eq!(stats.entries, EntryCounts { total: 2, valid: 1, expired: 1 });
        assert_eq!(stats.tables["person"].total, 2);
        assert_eq!(stats.tables["post"].valid, 1);
        assert_eq!(stats.dependency_links["person"], 3);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(CacheStatus::Fresh.to_string(), "fresh");
        assert_eq!(serde_json::to_string(&CacheStatus::Cached).unwrap(), "\"cached\"");
    }
}
