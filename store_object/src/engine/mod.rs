//! Engine abstraction
//!
//! An engine accepts logical query descriptions and returns raw rows or SQL
//! text. It knows nothing about entities, relationships or caching.

pub mod eval;
pub mod memory;
pub mod postgres;

pub use memory::MemoryEngine;
pub use postgres::PgEngine;

use crate::errors::EngineError;
use crate::query_builder::filter::QueryFilter;
use crate::query_builder::logical::{LogicalQuery, RawRow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use type_mapping::{FieldType, Record};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub options: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|column| column.name == name)
    }
}

/// Result of defining a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHandle {
    pub name: String,
    /// The table did not exist before
    pub created: bool,
    /// Columns added to an existing table
    pub added_columns: Vec<String>,
}

#[async_trait]
pub trait Engine: Send + Sync + Debug {
    /// Short engine name for logs
    fn name(&self) -> &'static str;

    /// Create the table, or add the columns an existing table lacks
    async fn define_table(&self, schema: &TableSchema) -> Result<TableHandle, EngineError>;

    /// Make an already existing table known without migrating it
    fn attach_table(&self, _schema: &TableSchema) -> Result<(), EngineError> {
        Ok(())
    }

    async fn select(&self, query: &LogicalQuery) -> Result<Vec<RawRow>, EngineError>;

    /// SQL text the query runs as (parameters inlined)
    fn to_sql(&self, query: &LogicalQuery) -> Result<String, EngineError>;

    /// Insert one row and return its new id
    async fn insert(&self, table: &str, record: &Record) -> Result<i64, EngineError>;

    /// Update matching rows, returning how many changed
    async fn update(
        &self,
        table: &str,
        filter: &QueryFilter,
        record: &Record,
    ) -> Result<u64, EngineError>;

    /// Delete matching rows, returning how many were removed
    async fn delete(&self, table: &str, filter: &QueryFilter) -> Result<u64, EngineError>;
}
