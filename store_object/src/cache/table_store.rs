//! Cache entries persisted in two tables of the application database
//!
//! `typehaus_cache` holds one row per entry and `typehaus_cache_dependency`
//! links an entry to every `(table, id)` pair it was computed from. Both are
//! defined through the engine like any entity, but never get invalidation
//! hooks of their own.

use crate::engine::{Engine, TableSchema};
use crate::errors::{DalError, EngineError};
use crate::query_builder::aggregation::SelectField;
use crate::query_builder::field::{FieldRef, TableRef};
use crate::query_builder::filter::QueryFilter;
use crate::query_builder::logical::{LogicalQuery, RawRow};
use crate::schema::entity::{EntityBuilder, EntityDef};
use crate::schema::field::FieldDescriptor;
use async_trait::async_trait;
use cache_system::{
    CacheEntry, CacheError, CacheStats, CacheStore, Dependency, DependencySet,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use type_mapping::{Record, Value};

pub const ENTRY_TABLE: &str = "typehaus_cache";
pub const DEPENDENCY_TABLE: &str = "typehaus_cache_dependency";

#[derive(Debug, Clone)]
pub struct TableCacheStore {
    engine: Arc<dyn Engine>,
}

fn store_error(error: EngineError) -> CacheError {
    CacheError::Store(error.to_string())
}

fn timestamp(at: DateTime<Utc>) -> Value {
    Value::Timestamp(at.naive_utc())
}

fn read_timestamp(row: &RawRow, key: &str) -> Option<DateTime<Utc>> {
    match row.get(key) {
        Some(Value::Timestamp(at)) => Some(at.and_utc()),
        _ => None,
    }
}

impl TableCacheStore {
    /// Entity definitions of the two cache tables
    pub fn entities() -> Result<Vec<EntityDef>, DalError> {
        let entries = EntityBuilder::new(ENTRY_TABLE)
            .field(FieldDescriptor::string("key").required().option("unique", true))
            .field(FieldDescriptor::text("data"))
            .field(FieldDescriptor::datetime("cached_at"))
            .field(FieldDescriptor::datetime("expires_at"))
            .cache_dependency(false)
            .build()?;
        let links = EntityBuilder::new(DEPENDENCY_TABLE)
            .field(FieldDescriptor::reference("entry", ENTRY_TABLE).required())
            .field(FieldDescriptor::string("table_name").required())
            .field(FieldDescriptor::big_integer("idx").required())
            .cache_dependency(false)
            .build()?;
        Ok(vec![entries, links])
    }

    /// Define (or attach) both tables and return the store
    pub async fn install(engine: Arc<dyn Engine>, migrate: bool) -> Result<Self, DalError> {
        let schemas: Vec<TableSchema> = Self::entities()?.iter().map(EntityDef::schema).collect();
        for schema in &schemas {
            if migrate {
                engine.define_table(schema).await?;
            } else {
                engine.attach_table(schema)?;
            }
        }
        crate::debug_log!("cache tables ready on {} engine", engine.name());
        Ok(Self { engine })
    }

    fn entries() -> TableRef {
        TableRef::base(ENTRY_TABLE)
    }

    fn links() -> TableRef {
        TableRef::base(DEPENDENCY_TABLE)
    }

    async fn select_entries(&self, filter: Option<QueryFilter>) -> Result<Vec<RawRow>, CacheError> {
        let entries = Self::entries();
        let mut query = LogicalQuery::new(ENTRY_TABLE).select(
            ["id", "key", "data", "cached_at", "expires_at"]
                .into_iter()
                .map(|name| SelectField::field(entries.field(name))),
        );
        query.filter = filter;
        self.engine.select(&query).await.map_err(store_error)
    }

    async fn select_links(&self, filter: Option<QueryFilter>) -> Result<Vec<RawRow>, CacheError> {
        let links = Self::links();
        let mut query = LogicalQuery::new(DEPENDENCY_TABLE).select(
            ["entry", "table_name", "idx"]
                .into_iter()
                .map(|name| SelectField::field(links.field(name))),
        );
        query.filter = filter;
        self.engine.select(&query).await.map_err(store_error)
    }

    /// Entry ids linked to any of the given rows
    async fn linked_entries(&self, filter: QueryFilter) -> Result<BTreeSet<i64>, CacheError> {
        let key = Self::links().field("entry").path();
        Ok(self
            .select_links(Some(filter))
            .await?
            .iter()
            .filter_map(|row| row.get(&key).and_then(Value::as_i64))
            .collect())
    }

    async fn remove_entries(&self, ids: &BTreeSet<i64>) -> Result<u64, CacheError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.engine
            .delete(DEPENDENCY_TABLE, &FieldRef::new("entry").in_values(ids.iter().copied()))
            .await
            .map_err(store_error)?;
        self.engine
            .delete(ENTRY_TABLE, &FieldRef::new("id").in_values(ids.iter().copied()))
            .await
            .map_err(store_error)
    }

    fn entry_ids(rows: &[RawRow]) -> BTreeSet<i64> {
        let key = Self::entries().id().path();
        rows.iter()
            .filter_map(|row| row.get(&key).and_then(Value::as_i64))
            .collect()
    }

    fn entry_from_row(row: &RawRow, dependencies: DependencySet) -> Option<CacheEntry> {
        let entries = Self::entries();
        Some(CacheEntry {
            key: row.get(&entries.field("key").path())?.as_str()?.to_string(),
            payload: row
                .get(&entries.field("data").path())
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            cached_at: read_timestamp(row, &entries.field("cached_at").path())?,
            expires_at: read_timestamp(row, &entries.field("expires_at").path()),
            dependencies,
        })
    }

    /// Dependencies of every entry, keyed by entry id
    fn group_links(rows: &[RawRow]) -> BTreeMap<i64, DependencySet> {
        let links = Self::links();
        let (entry, table, idx) = (
            links.field("entry").path(),
            links.field("table_name").path(),
            links.field("idx").path(),
        );
        let mut grouped: BTreeMap<i64, DependencySet> = BTreeMap::new();
        for row in rows {
            let parts = (
                row.get(&entry).and_then(Value::as_i64),
                row.get(&table).and_then(Value::as_str),
                row.get(&idx).and_then(Value::as_i64),
            );
            if let (Some(entry), Some(table), Some(id)) = parts {
                grouped.entry(entry).or_default().insert(Dependency::new(table, id));
            }
        }
        grouped
    }
}

#[async_trait]
impl CacheStore for TableCacheStore {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let rows = self
            .select_entries(Some(Self::entries().field("key").eq(key)))
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let Some(id) = row.get(&Self::entries().id().path()).and_then(Value::as_i64) else {
            return Ok(None);
        };

        if read_timestamp(row, &Self::entries().field("expires_at").path())
            .is_some_and(|at| at <= Utc::now())
        {
            self.remove_entries(&BTreeSet::from([id])).await?;
            crate::debug_log!("cache entry {} expired", key);
            return Ok(None);
        }

        let links = self
            .select_links(Some(Self::links().field("entry").eq(id)))
            .await?;
        let dependencies = Self::group_links(&links).remove(&id).unwrap_or_default();
        Ok(Self::entry_from_row(row, dependencies))
    }

    async fn save(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let existing = self
            .select_entries(Some(Self::entries().field("key").eq(entry.key.as_str())))
            .await?;
        self.remove_entries(&Self::entry_ids(&existing)).await?;

        let mut record = Record::new();
        record.insert("key".to_string(), Value::from(entry.key.as_str()));
        record.insert("data".to_string(), Value::from(entry.payload.as_str()));
        record.insert("cached_at".to_string(), timestamp(entry.cached_at));
        record.insert(
            "expires_at".to_string(),
            entry.expires_at.map_or(Value::Null, timestamp),
        );
        let id = self
            .engine
            .insert(ENTRY_TABLE, &record)
            .await
            .map_err(store_error)?;

        for dependency in &entry.dependencies {
            let mut link = Record::new();
            link.insert("entry".to_string(), Value::Integer(id));
            link.insert("table_name".to_string(), Value::from(dependency.table.as_str()));
            link.insert("idx".to_string(), Value::Integer(dependency.id));
            if let Err(error) = self.engine.insert(DEPENDENCY_TABLE, &link).await {
                // An entry without all of its links would never be invalidated
                self.remove_entries(&BTreeSet::from([id])).await?;
                return Err(store_error(error));
            }
        }
        Ok(())
    }

    async fn invalidate(&self, table: &str, ids: &[i64]) -> Result<u64, CacheError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let links = Self::links();
        let entries = self
            .linked_entries(
                links.field("table_name").eq(table) & links.field("idx").in_values(ids.iter().copied()),
            )
            .await?;
        self.remove_entries(&entries).await
    }

    async fn clear_all(&self) -> Result<u64, CacheError> {
        self.engine
            .delete(DEPENDENCY_TABLE, &QueryFilter::Always(true))
            .await
            .map_err(store_error)?;
        self.engine
            .delete(ENTRY_TABLE, &QueryFilter::Always(true))
            .await
            .map_err(store_error)
    }

    async fn clear_expired(&self) -> Result<u64, CacheError> {
        let expires_at = Self::entries().field("expires_at");
        let expired = self
            .select_entries(Some(
                expires_at.is_not_null() & expires_at.lte(timestamp(Utc::now())),
            ))
            .await?;
        self.remove_entries(&Self::entry_ids(&expired)).await
    }

    async fn clear_table(&self, table: &str) -> Result<u64, CacheError> {
        let entries = self
            .linked_entries(Self::links().field("table_name").eq(table))
            .await?;
        self.remove_entries(&entries).await
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let rows = self.select_entries(None).await?;
        let mut links = Self::group_links(&self.select_links(None).await?);
        let id_key = Self::entries().id().path();
        let entries: Vec<CacheEntry> = rows
            .iter()
            .filter_map(|row| {
                let id = row.get(&id_key).and_then(Value::as_i64)?;
                Self::entry_from_row(row, links.remove(&id).unwrap_or_default())
            })
            .collect();
        Ok(CacheStats::from_entries(&entries, Utc::now()))
    }
}
