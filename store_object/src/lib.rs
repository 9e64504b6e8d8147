//! Store Object - typed ORM core for TypeHaus
//!
//! This crate provides entity schemas and their registry, the query builder
//! and its compilation into logical queries, the engines that run them, the
//! materializer and result containers, and cache-aware execution.

/// Conditional debug logging macros
/// These macros only compile in code when the `debug-logging` feature is enabled
#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {{}};
}

#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {{}};
}

pub mod cache;
pub mod dal;
pub mod engine;
pub mod entity;
pub mod errors;
pub mod materialize;
pub mod prelude;
pub mod query_builder;
pub mod rows;
pub mod schema;
pub mod validation;

pub use cache::{memoize, memoize_named, open_store, TableCacheStore};
pub use cache_system::{CacheParams, CacheStatus, Expiry};
pub use dal::{Dal, DalOptions, Table};
pub use engine::{Engine, MemoryEngine, PgEngine, TableHandle, TableSchema};
pub use entity::{Entity, Related};
pub use errors::{DalError, EngineError};
pub use query_builder::{
    CacheOptions, FieldRef, JoinOptions, JoinType, PaginatedRows, Pagination, QueryBuilder,
    QueryFilter, QueryOperator, SelectOptions, SortOrder, TableRef,
};
pub use rows::{RowsMetadata, TypedRows};
pub use schema::{EntityBuilder, EntityDef, FieldDescriptor, Registry, Relationship};
pub use type_mapping::{FieldType, Record, Value};
pub use validation::ValidationError;

/// Build a `Record` from field/value pairs
pub fn record<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Record
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}
