//! Logical query description handed to engines
//!
//! Every column reference in a compiled `LogicalQuery` is scoped to an alias,
//! and every raw row comes back keyed by `SelectField::key`.

use crate::query_builder::aggregation::SelectField;
use crate::query_builder::field::FieldRef;
use crate::query_builder::filter::QueryFilter;
use crate::query_builder::join::JoinClause;
use crate::query_builder::ordering::OrderBy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use type_mapping::Value;

/// One engine row, keyed `alias.column` or by aggregate label
pub type RawRow = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalQuery {
    pub table: String,
    pub alias: String,
    pub fields: Vec<SelectField>,
    pub joins: Vec<JoinClause>,
    pub filter: Option<QueryFilter>,
    pub group_by: Vec<FieldRef>,
    pub having: Option<QueryFilter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub distinct: bool,
}

impl LogicalQuery {
    /// Query over `table`, aliased by its own name, selecting nothing yet
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            alias: table.to_string(),
            fields: Vec::new(),
            joins: Vec::new(),
            filter: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
        }
    }

    pub fn select(mut self, fields: impl IntoIterator<Item = SelectField>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// AND a filter into the WHERE clause
    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing & filter,
            None => filter,
        });
        self
    }

    pub fn join(mut self, join: JoinClause) -> Self {
        self.joins.push(join);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether rows are groups rather than table rows
    pub fn is_aggregated(&self) -> bool {
        !self.group_by.is_empty() || self.fields.iter().any(SelectField::is_aggregate)
    }

    /// Keys of the selected columns, in projection order
    pub fn keys(&self) -> Vec<String> {
        self.fields.iter().map(SelectField::key).collect()
    }
}
