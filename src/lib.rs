//! # TypeHaus
//!
//! A typed ORM layer for PostgreSQL: entities described with builders, a query
//! builder that compiles relationship joins, materialized result trees, signals,
//! and query caching with row-level invalidation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use typehaus::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = Registry::new();
//!     registry.define(
//!         EntityBuilder::new("person")
//!             .field(FieldDescriptor::string("name").required())
//!             .build()?,
//!     )?;
//!     registry.define(
//!         EntityBuilder::new("post")
//!             .field(FieldDescriptor::string("title").required())
//!             .field(FieldDescriptor::reference("author", "person").required())
//!             .build()?,
//!     )?;
//!
//!     let typehaus = TypeHaus::connect(AppConfig::load()?, registry).await?;
//!     let author = typehaus.table("person")?.insert(record([("name", "Ada")])).await?;
//!     typehaus
//!         .table("post")?
//!         .insert(record([("title", Value::from("Engines")), ("author", Value::from(author))]))
//!         .await?;
//!
//!     let posts = typehaus
//!         .query("post")?
//!         .join(["author"])
//!         .cache(["id"])
//!         .collect()
//!         .await?;
//!     for post in posts.iter() {
//!         println!("{} by {:?}", post.get::<String>("title")?, post.one("author"));
//!     }
//!     Ok(())
//! }
//! ```

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

pub mod core;
pub mod errors;
pub mod migration;
pub mod prelude;

// Re-export the main public types for convenience
pub use core::TypeHaus;
pub use errors::TypeHausError;

// Re-export centralized config
pub use config::{AppConfig, CacheConfig, DatabaseConfig, LazyPolicy, OrmConfig};

// Re-export internal crates
pub use cache_system;
pub use signal_system;
pub use store_object;
pub use type_mapping;

// Re-export external dependencies used in public API
pub use async_trait;
pub use sqlx;
