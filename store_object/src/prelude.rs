//! Convenience re-exports for common store-object usage

// Schema
pub use crate::schema::{
    slug, timestamps, EntityBuilder, EntityDef, FieldDescriptor, JoinStep, Registry, Relationship,
    SchemaFragment,
};

// Sessions and results
pub use crate::dal::{Dal, DalOptions, Table};
pub use crate::entity::{Entity, Related};
pub use crate::rows::TypedRows;

// Engines
pub use crate::engine::{Engine, MemoryEngine, PgEngine};

// Query building
pub use crate::query_builder::{
    CacheOptions, FieldRef, JoinOptions, JoinType, OrderBy, PaginatedRows, QueryBuilder,
    QueryFilter, SelectField, SelectOptions, SortOrder, TableRef,
};

// Caching
pub use crate::cache::{memoize, memoize_named};
pub use cache_system::{CacheStatus, Expiry};

// Error types
pub use crate::errors::{DalError, EngineError};

// Values
pub use crate::record;
pub use type_mapping::{FieldType, FromValue, Record, Value};

// Common external dependencies that are frequently used
pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
