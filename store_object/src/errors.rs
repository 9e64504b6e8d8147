use crate::validation::ValidationError;
use cache_system::CacheError;
use signal_system::EventProcessingError;
use thiserror::Error;
use type_mapping::CoercionError;

/// Failures raised by an engine implementation
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column {table}.{column}")]
    UnknownColumn { table: String, column: String },

    #[error("Unknown alias: {0}")]
    UnknownAlias(String),

    #[error("Unsupported query: {0}")]
    Unsupported(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Internal engine error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum DalError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Relationship {entity}.{relationship} points at unknown entity '{target}'")]
    UnresolvedRelationship {
        entity: String,
        relationship: String,
        target: String,
    },

    #[error("Entity '{0}' is already defined with a different shape")]
    DuplicateEntity(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Unknown field {entity}.{field}")]
    UnknownField { entity: String, field: String },

    #[error("Unknown relationship {entity}.{relationship}")]
    UnknownRelationship { entity: String, relationship: String },

    #[error("Integrity error on {table}.{field}: {message}")]
    Integrity {
        table: String,
        field: String,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Relationship {table}.{relationship} was not joined and its lazy policy forbids loading it")]
    LazyAccess { table: String, relationship: String },

    #[error("Invalid query: {0}")]
    Query(String),

    #[error("Hook aborted the operation: {0}")]
    Hook(#[from] EventProcessingError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Coercion error: {0}")]
    Coercion(#[from] CoercionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl DalError {
    pub(crate) fn integrity(table: &str, field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(table = %table, field = %field, "integrity error: {}", message);
        DalError::Integrity {
            table: table.to_string(),
            field: field.to_string(),
            message,
        }
    }

    pub(crate) fn unknown_field(entity: &str, field: &str) -> Self {
        DalError::UnknownField {
            entity: entity.to_string(),
            field: field.to_string(),
        }
    }

    /// Whether the error is the recoverable "no rows" case
    pub fn is_not_found(&self) -> bool {
        matches!(self, DalError::NotFound(_))
    }
}
