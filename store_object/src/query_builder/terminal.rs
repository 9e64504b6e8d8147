//! Terminal operations: compile the accumulated state and run it

use crate::errors::DalError;
use crate::materialize::materialize;
use crate::query_builder::aggregation::SelectField;
use crate::query_builder::builder::QueryBuilder;
use crate::query_builder::compile::{CachePlan, CompiledQuery, Compiler};
use crate::query_builder::field::FieldRef;
use crate::query_builder::logical::RawRow;
use crate::query_builder::pagination::{PaginatedRows, Pagination};
use crate::entity::Entity;
use crate::rows::{RowsMetadata, TypedRows};
use cache_system::{CacheEntry, CacheParams, CacheStatus, Dependency, DependencyScope, DependencySet};
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::time::Instant;
use type_mapping::{Record, Value};

/// Row key `column` selects its field under
const COLUMN_KEY: &str = "value";

impl QueryBuilder {
    pub fn compile(&self) -> Result<CompiledQuery, DalError> {
        Compiler::new(self.dal.registry(), self.entity.clone()).compile(&self.state)
    }

    /// SQL text of the query, parameters inlined
    pub fn to_sql(&self) -> Result<String, DalError> {
        let compiled = self.compile()?;
        Ok(self.dal.engine().to_sql(&compiled.query)?)
    }

    /// Raw rows without materialization or caching
    pub async fn execute(&self) -> Result<Vec<RawRow>, DalError> {
        let compiled = self.compile()?;
        self.fetch(&compiled).await
    }

    pub async fn collect(&self) -> Result<TypedRows, DalError> {
        let compiled = self.compile()?;
        let started = Instant::now();
        let sql = self.dal.engine().to_sql(&compiled.query)?;

        let (rows, cache_status, cache_key) = match (&compiled.cache, self.dal.cache()) {
            (Some(plan), Some(params)) => match compiled.cache_key() {
                Ok(key) => {
                    let (rows, status) = self.cached_rows(&compiled, plan, params, &key).await?;
                    (rows, status, Some(key))
                }
                Err(error) => {
                    tracing::warn!("query on {} cannot be cached: {}", compiled.root.table, error);
                    (self.fetch(&compiled).await?, CacheStatus::Fresh, None)
                }
            },
            (Some(_), None) => {
                crate::debug_log!("caching is disabled; running {} uncached", compiled.root.table);
                (self.fetch(&compiled).await?, CacheStatus::Fresh, None)
            }
            (None, _) => (self.fetch(&compiled).await?, CacheStatus::Fresh, None),
        };

        let entities = materialize(&compiled, self.dal.registry(), &rows)?;
        let metadata = RowsMetadata {
            sql,
            duration: started.elapsed(),
            cache_status,
            cache_key,
            joined: compiled.paths(),
        };
        Ok(TypedRows::new(
            &compiled.root.table,
            entities,
            metadata,
            Some(self.dal.clone()),
        ))
    }

    pub async fn collect_or_fail(&self) -> Result<TypedRows, DalError> {
        let rows = self.collect().await?;
        if rows.is_empty() {
            return Err(DalError::NotFound(format!(
                "no {} rows match the query",
                self.entity.name()
            )));
        }
        Ok(rows)
    }

    pub async fn first(&self) -> Result<Option<Entity>, DalError> {
        let offset = self.state.offset.unwrap_or(0);
        let rows = self.clone().limitby(1, offset).collect().await?;
        Ok(rows.into_iter().next())
    }

    pub async fn first_or_fail(&self) -> Result<Entity, DalError> {
        self.first().await?.ok_or_else(|| {
            DalError::NotFound(format!("no {} row matches the query", self.entity.name()))
        })
    }

    /// Number of matching base rows (groups, for grouped queries). Limits are ignored.
    pub async fn count(&self) -> Result<u64, DalError> {
        let compiled = self.compile()?;
        if compiled.aggregated {
            let groups = self.fetch(&compiled).await?;
            return Ok(groups.len() as u64);
        }
        let rows = self
            .dal
            .select(&compiled.root.table, &compiled.count_query(), &BTreeMap::new())
            .await?;
        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    pub async fn exists(&self) -> Result<bool, DalError> {
        Ok(self.count().await? > 0)
    }

    /// Page `page` (1-based) of `limit` rows; a limit of 0 returns every row
    pub async fn paginate(&self, limit: u64, page: u64) -> Result<PaginatedRows, DalError> {
        if limit == 0 {
            let rows = self.collect().await?;
            return Ok(PaginatedRows::new(rows, Pagination::new(0, 1, false), self.clone()));
        }

        let page = page.max(1);
        let offset = (page - 1).saturating_mul(limit);
        // One extra root tells whether a next page exists
        let mut rows = self
            .clone()
            .limitby(limit.saturating_add(1), offset)
            .collect()
            .await?;
        let has_next_page = rows.len() as u64 > limit;
        rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(PaginatedRows::new(
            rows,
            Pagination::new(limit, page, has_next_page),
            self.clone(),
        ))
    }

    /// Update every matching row, returning the affected primary keys
    pub async fn update(&self, values: Record) -> Result<Vec<i64>, DalError> {
        let ids = self.matching_ids().await?;
        self.dal.update_ids(&self.entity, &ids, values).await
    }

    /// Delete every matching row, returning the affected primary keys
    pub async fn delete(&self) -> Result<Vec<i64>, DalError> {
        let ids = self.matching_ids().await?;
        self.dal.delete_ids(&self.entity, &ids).await
    }

    /// Values of one field, one per result row
    pub async fn column(&self, field: impl Into<FieldRef>) -> Result<Vec<Value>, DalError> {
        let mut builder = self.clone();
        builder.state.select = vec![SelectField::field_as(field, COLUMN_KEY)];
        let compiled = builder.compile()?;
        let mut query = compiled.query.clone();
        // The root id stays so the rows are still recorded as dependencies
        let id_key = compiled.root.id().path();
        query
            .fields
            .retain(|selected| selected.key() == COLUMN_KEY || selected.key() == id_key);

        let rows = self
            .dal
            .select(&compiled.root.table, &query, &compiled.aliases)
            .await?;
        Ok(rows
            .into_iter()
            .map(|mut row| row.remove(COLUMN_KEY).unwrap_or_default())
            .collect())
    }

    /// Stream the results in pages of `size` rows until exhausted
    pub fn chunk(&self, size: u64) -> BoxStream<'static, Result<TypedRows, DalError>> {
        let size = size.max(1);
        let builder = self.clone();
        futures::stream::try_unfold(Some(0u64), move |offset| {
            let builder = builder.clone();
            async move {
                let Some(offset) = offset else {
                    return Ok(None);
                };
                let rows = builder.limitby(size, offset).collect().await?;
                if rows.is_empty() {
                    return Ok(None);
                }
                let next = (rows.len() as u64 == size).then_some(offset + size);
                Ok(Some((rows, next)))
            }
        })
        .boxed()
    }

    async fn fetch(&self, compiled: &CompiledQuery) -> Result<Vec<RawRow>, DalError> {
        self.dal
            .select(&compiled.root.table, &compiled.query, &compiled.aliases)
            .await
    }

    async fn matching_ids(&self) -> Result<Vec<i64>, DalError> {
        let compiled = self.compile()?;
        if compiled.aggregated {
            return Err(DalError::Query(
                "update and delete need a row query, not a grouped or aggregate one".to_string(),
            ));
        }
        let key = compiled.root.id().path();
        let rows = self
            .dal
            .select(&compiled.root.table, &compiled.id_query(), &compiled.aliases)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(&key).and_then(Value::as_i64))
            .collect())
    }

    /// Serve rows from the cache, or run the query and store its rows
    async fn cached_rows(
        &self,
        compiled: &CompiledQuery,
        plan: &CachePlan,
        params: &CacheParams,
        key: &str,
    ) -> Result<(Vec<RawRow>, CacheStatus), DalError> {
        match params.store.load(key).await {
            Ok(Some(entry)) => match serde_json::from_str::<Vec<RawRow>>(&entry.payload) {
                Ok(rows) => {
                    DependencyScope::record_all(entry.dependencies.iter().cloned());
                    crate::debug_log!("cache hit for {} ({})", compiled.root.table, key);
                    return Ok((rows, CacheStatus::Cached));
                }
                Err(error) => tracing::warn!("ignoring unreadable cache entry {}: {}", key, error),
            },
            Ok(None) => {}
            Err(error) => tracing::warn!("cache lookup of {} failed: {}", key, error),
        }

        let rows = self.fetch(compiled).await?;
        let dependencies = match &plan.dependency_fields {
            None if compiled.aggregated => {
                let ids = self
                    .dal
                    .select(&compiled.root.table, &compiled.dependency_query(), &compiled.aliases)
                    .await?;
                row_dependencies(compiled, plan, &ids)
            }
            _ => row_dependencies(compiled, plan, &rows),
        };

        let expires_at = params
            .expiry_or_default(plan.expiry.as_ref())
            .resolve(Utc::now())?;
        let payload = match serde_json::to_string(&rows) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!("rows of {} cannot be cached: {}", key, error);
                return Ok((rows, CacheStatus::Fresh));
            }
        };
        let entry = CacheEntry::new(key.to_string(), payload, expires_at, dependencies);
        match params.store.save(&entry).await {
            Ok(()) => crate::debug_log!(
                "cached {} rows of {} with {} dependencies",
                rows.len(),
                compiled.root.table,
                entry.dependencies.len()
            ),
            Err(error) => tracing::warn!("caching query result {} failed: {}", key, error),
        }
        Ok((rows, CacheStatus::Fresh))
    }
}

/// Rows a cached result depends on: the restricting fields, or every alias id
fn row_dependencies(compiled: &CompiledQuery, plan: &CachePlan, rows: &[RawRow]) -> DependencySet {
    let mut dependencies = DependencySet::new();
    for row in rows {
        match &plan.dependency_fields {
            Some(fields) => {
                for dependency in fields {
                    if let Some(id) = row.get(&dependency.field.path()).and_then(Value::as_i64) {
                        dependencies.insert(Dependency::new(&dependency.table, id));
                    }
                }
            }
            None => {
                for (alias, table) in &compiled.aliases {
                    if let Some(id) = row.get(&format!("{}.id", alias)).and_then(Value::as_i64) {
                        dependencies.insert(Dependency::new(table, id));
                    }
                }
            }
        }
    }
    dependencies
}
