//! Field and table references
//!
//! A `FieldRef` names a column either by the alias it is read from or by the
//! relationship path that leads to it (`"author.roles.name"`). Paths are turned
//! into aliases when the query compiles, after every join is known.

use crate::query_builder::aggregation::{Aggregate, AggregateFunction};
use crate::query_builder::filter::{Operand, QueryCondition, QueryFilter, QueryOperator};
use crate::query_builder::logical::LogicalQuery;
use crate::query_builder::ordering::{OrderBy, SortOrder};
use serde::{Deserialize, Serialize};
use std::fmt;
use type_mapping::Value;

/// Reference to a column, optionally scoped to an alias or relationship path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub scope: Option<String>,
    pub name: String,
}

impl FieldRef {
    /// Unscoped column of the base table
    pub fn new(name: &str) -> Self {
        Self {
            scope: None,
            name: name.to_string(),
        }
    }

    pub fn scoped(scope: &str, name: &str) -> Self {
        Self {
            scope: Some(scope.to_string()),
            name: name.to_string(),
        }
    }

    /// Parse `"name"`, `"person.name"` or `"author.roles.name"`
    pub fn parse(path: &str) -> Self {
        match path.rsplit_once('.') {
            Some((scope, name)) => Self::scoped(scope, name),
            None => Self::new(path),
        }
    }

    /// Dotted form, as accepted by `parse`
    pub fn path(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}.{}", scope, self.name),
            None => self.name.clone(),
        }
    }

    fn compare(&self, operator: QueryOperator, value: impl Into<Value>) -> QueryFilter {
        QueryFilter::Condition(QueryCondition {
            left: Operand::Field(self.clone()),
            operator,
            right: Some(Operand::Value(value.into())),
        })
    }

    /// `= value`; comparing with NULL compiles to `IS NULL`
    pub fn eq(&self, value: impl Into<Value>) -> QueryFilter {
        match value.into() {
            Value::Null => self.is_null(),
            value => self.compare(QueryOperator::Eq, value),
        }
    }

    pub fn ne(&self, value: impl Into<Value>) -> QueryFilter {
        match value.into() {
            Value::Null => self.is_not_null(),
            value => self.compare(QueryOperator::Ne, value),
        }
    }

    pub fn gt(&self, value: impl Into<Value>) -> QueryFilter {
        self.compare(QueryOperator::Gt, value)
    }

    pub fn gte(&self, value: impl Into<Value>) -> QueryFilter {
        self.compare(QueryOperator::Gte, value)
    }

    pub fn lt(&self, value: impl Into<Value>) -> QueryFilter {
        self.compare(QueryOperator::Lt, value)
    }

    pub fn lte(&self, value: impl Into<Value>) -> QueryFilter {
        self.compare(QueryOperator::Lte, value)
    }

    pub fn like(&self, pattern: &str) -> QueryFilter {
        self.compare(QueryOperator::Like, pattern)
    }

    /// Case insensitive LIKE
    pub fn ilike(&self, pattern: &str) -> QueryFilter {
        self.compare(QueryOperator::ILike, pattern)
    }

    pub fn in_values<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> QueryFilter {
        QueryFilter::Condition(QueryCondition {
            left: Operand::Field(self.clone()),
            operator: QueryOperator::In,
            right: Some(Operand::List(values.into_iter().map(Into::into).collect())),
        })
    }

    pub fn not_in<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> QueryFilter {
        QueryFilter::Condition(QueryCondition {
            left: Operand::Field(self.clone()),
            operator: QueryOperator::NotIn,
            right: Some(Operand::List(values.into_iter().map(Into::into).collect())),
        })
    }

    /// `IN (subquery)`; the subquery's first selected column is matched
    pub fn in_query(&self, query: LogicalQuery) -> QueryFilter {
        QueryFilter::Condition(QueryCondition {
            left: Operand::Field(self.clone()),
            operator: QueryOperator::In,
            right: Some(Operand::Subquery(Box::new(query))),
        })
    }

    pub fn is_null(&self) -> QueryFilter {
        QueryFilter::Condition(QueryCondition {
            left: Operand::Field(self.clone()),
            operator: QueryOperator::IsNull,
            right: None,
        })
    }

    pub fn is_not_null(&self) -> QueryFilter {
        QueryFilter::Condition(QueryCondition {
            left: Operand::Field(self.clone()),
            operator: QueryOperator::IsNotNull,
            right: None,
        })
    }

    /// List column contains `value`
    pub fn contains(&self, value: impl Into<Value>) -> QueryFilter {
        self.compare(QueryOperator::Contains, value)
    }

    /// List column contains the value of another column
    pub fn contains_field(&self, other: &FieldRef) -> QueryFilter {
        QueryFilter::Condition(QueryCondition {
            left: Operand::Field(self.clone()),
            operator: QueryOperator::Contains,
            right: Some(Operand::Field(other.clone())),
        })
    }

    /// List column shares at least one element with `values`
    pub fn overlaps<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> QueryFilter {
        QueryFilter::Condition(QueryCondition {
            left: Operand::Field(self.clone()),
            operator: QueryOperator::ArrayOverlap,
            right: Some(Operand::List(values.into_iter().map(Into::into).collect())),
        })
    }

    /// Column equals another column, the usual join condition
    pub fn eq_field(&self, other: &FieldRef) -> QueryFilter {
        QueryFilter::Condition(QueryCondition {
            left: Operand::Field(self.clone()),
            operator: QueryOperator::Eq,
            right: Some(Operand::Field(other.clone())),
        })
    }

    pub fn asc(&self) -> OrderBy {
        OrderBy::Field {
            field: self.clone(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(&self) -> OrderBy {
        OrderBy::Field {
            field: self.clone(),
            order: SortOrder::Desc,
        }
    }

    pub fn count(&self) -> Aggregate {
        Aggregate::new(AggregateFunction::Count, Some(self.clone()))
    }

    pub fn count_distinct(&self) -> Aggregate {
        Aggregate::new(AggregateFunction::CountDistinct, Some(self.clone()))
    }

    pub fn sum(&self) -> Aggregate {
        Aggregate::new(AggregateFunction::Sum, Some(self.clone()))
    }

    pub fn avg(&self) -> Aggregate {
        Aggregate::new(AggregateFunction::Avg, Some(self.clone()))
    }

    pub fn min(&self) -> Aggregate {
        Aggregate::new(AggregateFunction::Min, Some(self.clone()))
    }

    pub fn max(&self) -> Aggregate {
        Aggregate::new(AggregateFunction::Max, Some(self.clone()))
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

impl From<&str> for FieldRef {
    fn from(path: &str) -> Self {
        FieldRef::parse(path)
    }
}

impl From<String> for FieldRef {
    fn from(path: String) -> Self {
        FieldRef::parse(&path)
    }
}

impl From<&FieldRef> for FieldRef {
    fn from(field: &FieldRef) -> Self {
        field.clone()
    }
}

/// A table as it appears in one query: the table name and the alias it is read through
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub table: String,
    pub alias: String,
}

impl TableRef {
    pub fn new(table: &str, alias: &str) -> Self {
        Self {
            table: table.to_string(),
            alias: alias.to_string(),
        }
    }

    /// The base table of a query, aliased by its own name
    pub fn base(table: &str) -> Self {
        Self::new(table, table)
    }

    /// Column of this table, scoped to its alias
    pub fn field(&self, name: &str) -> FieldRef {
        FieldRef::scoped(&self.alias, name)
    }

    pub fn id(&self) -> FieldRef {
        self.field("id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_paths() {
        assert_eq!(FieldRef::parse("name"), FieldRef::new("name"));
        assert_eq!(
            FieldRef::parse("author.roles.name"),
            FieldRef::scoped("author.roles", "name")
        );
        assert_eq!(FieldRef::parse("person.id").path(), "person.id");
    }

    #[test]
    fn test_eq_null_becomes_is_null() {
        let filter = FieldRef::new("email").eq(Value::Null);
        match filter {
            QueryFilter::Condition(condition) => {
                assert_eq!(condition.operator, QueryOperator::IsNull);
                assert!(condition.right.is_none());
            }
            other => panic!("unexpected filter {:?}", other),
        }
    }

    #[test]
    fn test_table_ref_scopes_by_alias() {
        let roles = TableRef::new("role", "roles_2");
        assert_eq!(roles.field("name"), FieldRef::scoped("roles_2", "name"));
        assert_eq!(TableRef::base("person").id().path(), "person.id");
    }
}
