//! Error types for the TypeHaus crate
//!
//! This module contains all error types that can be returned while assembling a session.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypeHausError {
    #[error("Database connection error: {0}")]
    DatabaseConnection(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Engine(#[from] store_object::EngineError),

    #[error(transparent)]
    Dal(#[from] store_object::DalError),

    #[error("Health check is only available on the postgres engine, not {0}")]
    NoHealthCheck(&'static str),
}
