//! Session-level data access layer
//!
//! A `Dal` owns the finalized registry, the engine, the signal manager and the
//! optional cache parameters. Every read and write of the ORM goes through it,
//! which is where events are emitted and touched rows are recorded for
//! memoization.

use crate::engine::Engine;
use crate::entity::Entity;
use crate::errors::DalError;
use crate::query_builder::builder::{QueryBuilder, WherePart};
use crate::query_builder::field::FieldRef;
use crate::query_builder::filter::QueryFilter;
use crate::query_builder::logical::{LogicalQuery, RawRow};
use crate::rows::TypedRows;
use crate::schema::entity::EntityDef;
use crate::schema::registry::Registry;
use cache_system::{CacheError, CacheParams, CacheStats, DependencyScope};
use config::{LazyPolicy, OrmConfig};
use signal_system::{DatabaseEvent, EventPhase, EventType, SignalManager};
use std::collections::BTreeMap;
use std::sync::Arc;
use type_mapping::{Record, Value};

/// How a session is opened
#[derive(Debug, Clone, Default)]
pub struct DalOptions {
    /// Policy for relationships that declare none
    pub lazy_policy: LazyPolicy,
    /// Create missing tables and columns while opening
    pub migrate: bool,
    /// `None` disables query caching, memoization and the invalidation hooks
    pub cache: Option<CacheParams>,
}

impl DalOptions {
    pub fn from_config(orm: &OrmConfig) -> Self {
        Self {
            lazy_policy: orm.lazy_policy,
            migrate: orm.migrate,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: CacheParams) -> Self {
        self.cache = Some(cache);
        self
    }
}

pub struct Dal {
    engine: Arc<dyn Engine>,
    registry: Registry,
    signals: Arc<SignalManager>,
    cache: Option<CacheParams>,
    lazy_policy: LazyPolicy,
}

impl std::fmt::Debug for Dal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dal")
            .field("engine", &self.engine.name())
            .field("entities", &self.registry.names().collect::<Vec<_>>())
            .field("caching", &self.cache.is_some())
            .field("lazy_policy", &self.lazy_policy)
            .finish()
    }
}

impl Dal {
    /// Finalize the registry, migrate or attach every table and install the
    /// cache invalidation hooks
    pub async fn open(
        engine: Arc<dyn Engine>,
        mut registry: Registry,
        signals: Arc<SignalManager>,
        options: DalOptions,
    ) -> Result<Arc<Self>, DalError> {
        if !registry.is_finalized() {
            registry.finalize()?;
        }

        for entity in registry.migration_order() {
            let schema = entity.schema();
            if options.migrate {
                let handle = engine.define_table(&schema).await?;
                if handle.created {
                    tracing::info!("Created table {}", handle.name);
                } else if !handle.added_columns.is_empty() {
                    tracing::info!(
                        "Added columns {:?} to table {}",
                        handle.added_columns,
                        handle.name
                    );
                }
            } else {
                engine.attach_table(&schema)?;
            }
        }

        if let Some(cache) = &options.cache {
            for entity in registry.entities().filter(|entity| entity.cache_dependency()) {
                install_invalidation(&signals, entity.name(), cache);
            }
        }

        crate::debug_log!(
            "opened session on {} engine (caching: {})",
            engine.name(),
            options.cache.is_some()
        );
        Ok(Arc::new(Self {
            engine,
            registry,
            signals,
            cache: options.cache,
            lazy_policy: options.lazy_policy,
        }))
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn signals(&self) -> &Arc<SignalManager> {
        &self.signals
    }

    pub fn cache(&self) -> Option<&CacheParams> {
        self.cache.as_ref()
    }

    pub fn lazy_policy(&self) -> LazyPolicy {
        self.lazy_policy
    }

    pub fn table(self: &Arc<Self>, name: &str) -> Result<Table, DalError> {
        Ok(Table {
            dal: self.clone(),
            entity: self.registry.entity(name)?,
        })
    }

    pub fn query(self: &Arc<Self>, name: &str) -> Result<QueryBuilder, DalError> {
        Ok(QueryBuilder::new(self.clone(), self.registry.entity(name)?))
    }

    fn cache_params(&self) -> Result<&CacheParams, DalError> {
        self.cache.as_ref().ok_or(DalError::Cache(CacheError::Disabled))
    }

    /// Remove every cached entry
    pub async fn clear_cache(&self) -> Result<u64, DalError> {
        Ok(self.cache_params()?.store.clear_all().await?)
    }

    pub async fn clear_expired_cache(&self) -> Result<u64, DalError> {
        Ok(self.cache_params()?.store.clear_expired().await?)
    }

    /// Remove every cached entry that depends on a row of `table`
    pub async fn clear_table_cache(&self, table: &str) -> Result<u64, DalError> {
        Ok(self.cache_params()?.store.clear_table(table).await?)
    }

    pub async fn cache_stats(&self) -> Result<CacheStats, DalError> {
        Ok(self.cache_params()?.store.stats().await?)
    }

    /// Run a select, emitting select events and recording every row id found
    /// under the given aliases into the active dependency scope
    pub(crate) async fn select(
        &self,
        table: &str,
        query: &LogicalQuery,
        aliases: &BTreeMap<String, String>,
    ) -> Result<Vec<RawRow>, DalError> {
        self.signals
            .emit(DatabaseEvent::before(EventType::Select, table))
            .await?;

        let rows = self.engine.select(query).await?;

        let root_key = format!("{}.id", query.alias);
        let root_ids: Vec<i64> = rows
            .iter()
            .filter_map(|row| row.get(&root_key).and_then(Value::as_i64))
            .collect();
        if DependencyScope::is_active() {
            for row in &rows {
                for (alias, table) in aliases {
                    if let Some(id) = row.get(&format!("{}.id", alias)).and_then(Value::as_i64) {
                        DependencyScope::record(table, id);
                    }
                }
            }
        }

        self.signals
            .emit(DatabaseEvent::after(EventType::Select, table).with_record_ids(root_ids))
            .await?;
        Ok(rows)
    }

    /// Validate and insert one row, returning its id
    pub(crate) async fn insert_record(&self, entity: &EntityDef, values: Record) -> Result<i64, DalError> {
        let record = prepare_insert(entity, values)?;
        self.write_insert(entity, record).await
    }

    /// Validate every row before inserting any of them
    pub(crate) async fn insert_records(
        &self,
        entity: &EntityDef,
        values: Vec<Record>,
    ) -> Result<Vec<i64>, DalError> {
        let records = values
            .into_iter()
            .map(|record| prepare_insert(entity, record))
            .collect::<Result<Vec<_>, _>>()?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(self.write_insert(entity, record).await?);
        }
        Ok(ids)
    }

    async fn write_insert(&self, entity: &EntityDef, record: Record) -> Result<i64, DalError> {
        let table = entity.name();
        self.signals
            .emit(DatabaseEvent::before(EventType::Insert, table).with_payload(record.clone()))
            .await?;
        let id = self.engine.insert(table, &record).await?;
        crate::debug_log!("inserted {}#{}", table, id);
        self.signals
            .emit(
                DatabaseEvent::after(EventType::Insert, table)
                    .with_record_ids(vec![id])
                    .with_payload(record),
            )
            .await?;
        Ok(id)
    }

    /// Update the rows with the given ids. Cache entries depending on them are
    /// invalidated by the before-update hook before the engine is called.
    pub(crate) async fn update_ids(
        &self,
        entity: &EntityDef,
        ids: &[i64],
        values: Record,
    ) -> Result<Vec<i64>, DalError> {
        let table = entity.name();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        for key in values.keys() {
            if key == "id" {
                return Err(DalError::Query("the primary key cannot be updated".to_string()));
            }
            if !entity.has_field(key) {
                return Err(DalError::unknown_field(table, key));
            }
        }

        let mut record = values;
        for hook in entity.before_update_hooks() {
            hook(&mut record);
        }
        let record = coerce_record(entity, record)?;
        for (name, value) in &record {
            let required = entity.field(name).is_some_and(|field| field.required);
            if required && value.is_null() {
                return Err(DalError::integrity(table, name, "required field cannot be set to NULL"));
            }
        }

        self.signals
            .emit(
                DatabaseEvent::before(EventType::Update, table)
                    .with_record_ids(ids.to_vec())
                    .with_payload(record.clone()),
            )
            .await?;
        let affected = self.engine.update(table, &id_filter(ids), &record).await?;
        crate::debug_log!("updated {} rows of {}", affected, table);
        self.signals
            .emit(
                DatabaseEvent::after(EventType::Update, table)
                    .with_record_ids(ids.to_vec())
                    .with_payload(record),
            )
            .await?;
        Ok(ids.to_vec())
    }

    pub(crate) async fn delete_ids(&self, entity: &EntityDef, ids: &[i64]) -> Result<Vec<i64>, DalError> {
        let table = entity.name();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.signals
            .emit(DatabaseEvent::before(EventType::Delete, table).with_record_ids(ids.to_vec()))
            .await?;
        let affected = self.engine.delete(table, &id_filter(ids)).await?;
        crate::debug_log!("deleted {} rows of {}", affected, table);
        self.signals
            .emit(DatabaseEvent::after(EventType::Delete, table).with_record_ids(ids.to_vec()))
            .await?;
        Ok(ids.to_vec())
    }
}

fn id_filter(ids: &[i64]) -> QueryFilter {
    FieldRef::new("id").in_values(ids.iter().copied())
}

/// Defaults, before-insert hooks, coercion and required-field checks
fn prepare_insert(entity: &EntityDef, values: Record) -> Result<Record, DalError> {
    let table = entity.name();
    for key in values.keys() {
        if !entity.has_field(key) {
            return Err(DalError::unknown_field(table, key));
        }
    }

    let mut record = values;
    for field in entity.fields() {
        if let Some(default) = &field.default {
            record
                .entry(field.name.clone())
                .or_insert_with(|| default.produce());
        }
    }
    for hook in entity.before_insert_hooks() {
        hook(&mut record);
    }
    let mut record = coerce_record(entity, record)?;

    for field in entity.fields().iter().filter(|field| field.required && !field.is_id()) {
        if record.get(&field.name).map_or(true, Value::is_null) {
            return Err(DalError::integrity(table, &field.name, "required field is missing"));
        }
    }
    if record.get("id").is_some_and(Value::is_null) {
        record.remove("id");
    }
    Ok(record)
}

fn coerce_record(entity: &EntityDef, record: Record) -> Result<Record, DalError> {
    record
        .into_iter()
        .map(|(name, value)| {
            let value = match entity.field(&name) {
                Some(field) => field.field_type.coerce(value)?,
                None => value,
            };
            Ok((name, value))
        })
        .collect()
}

/// Drop cache entries linked to rows before they are updated or deleted
fn install_invalidation(signals: &SignalManager, table: &str, cache: &CacheParams) {
    for event_type in [EventType::Update, EventType::Delete] {
        let store = cache.store.clone();
        signals.on(table, event_type, EventPhase::Before, move |event| {
            let store = store.clone();
            async move {
                let removed = store.invalidate(&event.table_name, &event.record_ids).await?;
                crate::debug_log!(
                    "invalidated {} cache entries for {} {:?}",
                    removed,
                    event.table_name,
                    event.record_ids
                );
                Ok(())
            }
        });
    }
}

/// One entity of a session
#[derive(Clone)]
pub struct Table {
    dal: Arc<Dal>,
    entity: Arc<EntityDef>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table").field("entity", &self.entity.name()).finish()
    }
}

impl Table {
    pub fn name(&self) -> &str {
        self.entity.name()
    }

    pub fn entity(&self) -> &Arc<EntityDef> {
        &self.entity
    }

    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::new(self.dal.clone(), self.entity.clone())
    }

    /// Insert a row and return its id
    pub async fn insert(&self, values: Record) -> Result<i64, DalError> {
        self.dal.insert_record(&self.entity, values).await
    }

    /// Insert a row and load it back
    pub async fn create(&self, values: Record) -> Result<Entity, DalError> {
        let id = self.insert(values).await?;
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DalError::NotFound(format!("{}#{} after insert", self.name(), id)))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Entity>, DalError> {
        self.query().where_eq("id", id).first().await
    }

    /// Insert several rows and load them back in insertion order. Every row is
    /// validated first, so one invalid row inserts nothing.
    pub async fn bulk_insert(&self, rows: Vec<Record>) -> Result<TypedRows, DalError> {
        let ids = self.dal.insert_records(&self.entity, rows).await?;
        self.query()
            .where_(FieldRef::new("id").in_values(ids))
            .orderby(["id"])
            .collect()
            .await
    }

    /// Update the first row matching `lookup`, or insert `values` when no row
    /// matches. Pass the values themselves as the lookup to match on them.
    pub async fn update_or_insert(
        &self,
        lookup: impl Into<WherePart>,
        values: Record,
    ) -> Result<Entity, DalError> {
        let Some(existing) = self.query().where_(lookup).first().await? else {
            return self.create(values).await;
        };
        let id = existing
            .id()
            .ok_or_else(|| DalError::Query(format!("{} row without an id", self.name())))?;
        if !values.is_empty() {
            self.dal.update_ids(&self.entity, &[id], values).await?;
        }
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DalError::NotFound(format!("{}#{} after update", self.name(), id)))
    }
}
