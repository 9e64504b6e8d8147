//! Ordered, id-indexed query results

use crate::dal::Dal;
use crate::entity::{Entity, Related};
use crate::errors::DalError;
use cache_system::{CacheStatus, Dependency, DependencySet};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use type_mapping::{Record, Value};

/// How a result set was produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowsMetadata {
    /// SQL text of the compiled query
    pub sql: String,
    pub duration: Duration,
    pub cache_status: CacheStatus,
    pub cache_key: Option<String>,
    /// Relationship paths joined into the rows
    pub joined: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TypedRows {
    table: String,
    records: Vec<Entity>,
    index: HashMap<i64, usize>,
    metadata: RowsMetadata,
    dal: Option<Arc<Dal>>,
}

impl TypedRows {
    pub(crate) fn new(
        table: &str,
        mut records: Vec<Entity>,
        metadata: RowsMetadata,
        dal: Option<Arc<Dal>>,
    ) -> Self {
        if let Some(dal) = &dal {
            records.iter_mut().for_each(|record| record.attach(dal));
        }
        let mut rows = Self {
            table: table.to_string(),
            records,
            index: HashMap::new(),
            metadata,
            dal,
        };
        rows.reindex();
        rows
    }

    fn reindex(&mut self) {
        self.index = self
            .records
            .iter()
            .enumerate()
            .filter_map(|(position, record)| record.id().map(|id| (id, position)))
            .collect();
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn metadata(&self) -> &RowsMetadata {
        &self.metadata
    }

    pub fn cache_status(&self) -> CacheStatus {
        self.metadata.cache_status
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entity> {
        self.records.iter()
    }

    pub fn first(&self) -> Option<&Entity> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&Entity> {
        self.records.last()
    }

    /// Row by primary key
    pub fn get(&self, id: i64) -> Option<&Entity> {
        self.index.get(&id).map(|&position| &self.records[position])
    }

    /// Row by position
    pub fn get_index(&self, position: usize) -> Option<&Entity> {
        self.records.get(position)
    }

    pub fn find<F: Fn(&Entity) -> bool>(&self, predicate: F) -> Vec<&Entity> {
        self.records.iter().filter(|record| predicate(record)).collect()
    }

    /// Remove the rows matching `predicate` and return them
    pub fn exclude<F: Fn(&Entity) -> bool>(&mut self, predicate: F) -> Vec<Entity> {
        let (removed, kept) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|record| predicate(record));
        self.records = kept;
        self.reindex();
        removed
    }

    pub fn sort_by<F: FnMut(&Entity, &Entity) -> Ordering>(mut self, compare: F) -> Self {
        self.records.sort_by(compare);
        self.reindex();
        self
    }

    pub fn ids(&self) -> Vec<i64> {
        self.records.iter().filter_map(Entity::id).collect()
    }

    /// Values of one field, `Null` where it was not projected
    pub fn column(&self, field: &str) -> Vec<Value> {
        self.records
            .iter()
            .map(|record| record.value(field).cloned().unwrap_or_default())
            .collect()
    }

    /// Rows grouped by the value of `field`, groups in first-seen order
    pub fn group_by_value(&self, field: &str) -> Vec<(Value, Vec<&Entity>)> {
        let mut groups: Vec<(Value, Vec<&Entity>)> = Vec::new();
        for record in &self.records {
            let value = record.value(field).cloned().unwrap_or_default();
            match groups.iter_mut().find(|(key, _)| *key == value) {
                Some((_, members)) => members.push(record),
                None => groups.push((value, vec![record])),
            }
        }
        groups
    }

    pub fn as_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.records.iter().map(Entity::as_json).collect())
    }

    /// The rows as CSV with a `table.field` header. Joined data is left out and
    /// NULL is written as `<NULL>`.
    pub fn as_csv(&self) -> Result<String, DalError> {
        let columns = self.csv_columns();
        if columns.is_empty() {
            return Ok(String::new());
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(columns.iter().map(|(header, _)| header))?;
        for record in &self.records {
            writer.write_record(columns.iter().map(|(_, key)| match record.value(key) {
                None | Some(Value::Null) => "<NULL>".to_string(),
                Some(value) => value.to_string(),
            }))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|error| DalError::Csv(error.into_error().into()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// `(header, key)` pairs: schema fields in declaration order, then any
    /// other projected keys sorted
    fn csv_columns(&self) -> Vec<(String, String)> {
        let mut present: BTreeSet<&str> = self
            .records
            .iter()
            .flat_map(|record| record.values().keys().map(String::as_str))
            .collect();
        let mut columns = Vec::with_capacity(present.len());
        if let Some(entity) = self.dal.as_ref().and_then(|dal| dal.registry().entity(&self.table).ok()) {
            for name in entity.field_names() {
                if present.remove(name) {
                    columns.push((format!("{}.{}", self.table, name), name.to_string()));
                }
            }
        }
        columns.extend(present.into_iter().map(|key| (key.to_string(), key.to_string())));
        columns
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<Vec<T>, DalError> {
        self.records.iter().map(Entity::decode).collect()
    }

    /// Every `(table, id)` pair held by the rows and their related data
    pub fn dependencies(&self) -> DependencySet {
        let mut dependencies = DependencySet::new();
        let mut stack: Vec<&Entity> = self.records.iter().collect();
        while let Some(entity) = stack.pop() {
            if let Some(id) = entity.id() {
                dependencies.insert(Dependency::new(entity.table(), id));
            }
            for (_, related) in entity.relations() {
                match related {
                    Related::One(Some(child)) => stack.push(child),
                    Related::One(None) => {}
                    Related::Many(children) => stack.extend(children.iter()),
                }
            }
        }
        dependencies
    }

    /// Update every contained row
    pub async fn update(&self, values: Record) -> Result<Vec<i64>, DalError> {
        let dal = self.session()?;
        let def = dal.registry().entity(&self.table)?;
        dal.update_ids(&def, &self.ids(), values).await
    }

    /// Delete every contained row
    pub async fn delete(self) -> Result<Vec<i64>, DalError> {
        let dal = self.session()?;
        let def = dal.registry().entity(&self.table)?;
        dal.delete_ids(&def, &self.ids()).await
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
        self.reindex();
    }

    fn session(&self) -> Result<&Arc<Dal>, DalError> {
        self.dal.as_ref().ok_or_else(|| {
            DalError::Configuration(format!("{} rows are not attached to a session", self.table))
        })
    }
}

impl<'a> IntoIterator for &'a TypedRows {
    type Item = &'a Entity;
    type IntoIter = std::slice::Iter<'a, Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl IntoIterator for TypedRows {
    type Item = Entity;
    type IntoIter = std::vec::IntoIter<Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
