//! Query builder
//!
//! A `QueryBuilder` accumulates filters, projections, joins and cache options
//! against one entity. Terminal operations compile that state into a single
//! `LogicalQuery`, run it on the session's engine and materialize the rows.

pub mod aggregation;
pub mod builder;
pub mod compile;
pub mod field;
pub mod filter;
pub mod join;
pub mod logical;
pub mod ordering;
pub mod pagination;
pub mod sql_generation;
mod terminal;


#[cfg(test)]
mod integration_tests;

pub use aggregation::{Aggregate, AggregateFunction, SelectField};
pub use builder::{CacheOptions, JoinOptions, QueryBuilder, SelectOptions, WherePart};
pub use compile::{CachePlan, CompiledQuery, DependencyField, JoinNode};
pub use field::{FieldRef, TableRef};
pub use filter::{QueryFilter, QueryOperator};
pub use join::{JoinClause, JoinType};
pub use logical::{LogicalQuery, RawRow};
pub use ordering::{OrderBy, SortOrder};
pub use pagination::{PaginatedRows, Pagination};
