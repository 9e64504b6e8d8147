//! Query filters
//!
//! Predicates are plain data: conditions over operands, nested AND/OR groups
//! and negation. Engines evaluate or render them; the compiler rewrites their
//! field references to concrete aliases.

use crate::query_builder::aggregation::Aggregate;
use crate::query_builder::field::FieldRef;
use crate::query_builder::logical::LogicalQuery;
use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr, Not};
use type_mapping::Value;

/// Query condition operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOperator {
    Eq,           // =
    Ne,           // !=
    Gt,           // >
    Gte,          // >=
    Lt,           // <
    Lte,          // <=
    Like,         // LIKE
    ILike,        // ILIKE (case insensitive)
    In,           // IN
    NotIn,        // NOT IN
    IsNull,       // IS NULL
    IsNotNull,    // IS NOT NULL
    Contains,     // value = ANY(list column)
    ArrayOverlap, // && (PostgreSQL array overlap)
}

/// One side of a condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Field(FieldRef),
    Value(Value),
    List(Vec<Value>),
    Aggregate(Aggregate),
    Subquery(Box<LogicalQuery>),
}

/// Single condition in WHERE clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCondition {
    pub left: Operand,
    pub operator: QueryOperator,
    /// None for IS NULL/IS NOT NULL
    pub right: Option<Operand>,
}

/// Logical operators for combining conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    And,
    Or,
}

/// Query filter that can be nested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryFilter {
    Condition(QueryCondition),
    Group {
        operator: LogicalOperator,
        filters: Vec<QueryFilter>,
    },
    Not(Box<QueryFilter>),
    /// Constant predicate, `1=1` or `1=0`
    Always(bool),
}

impl QueryFilter {
    /// Create a simple condition
    pub fn condition(field: &str, operator: QueryOperator, value: Option<Value>) -> Self {
        Self::Condition(QueryCondition {
            left: Operand::Field(FieldRef::parse(field)),
            operator,
            right: value.map(Operand::Value),
        })
    }

    /// Create AND group. A single member is returned as is.
    pub fn and(mut filters: Vec<QueryFilter>) -> Self {
        if filters.len() == 1 {
            return filters.remove(0);
        }
        Self::Group {
            operator: LogicalOperator::And,
            filters,
        }
    }

    /// Create OR group. A single member is returned as is.
    pub fn or(mut filters: Vec<QueryFilter>) -> Self {
        if filters.len() == 1 {
            return filters.remove(0);
        }
        Self::Group {
            operator: LogicalOperator::Or,
            filters,
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Equal condition
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        FieldRef::parse(field).eq(value)
    }

    /// Not equal condition
    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        FieldRef::parse(field).ne(value)
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        FieldRef::parse(field).gt(value)
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        FieldRef::parse(field).gte(value)
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        FieldRef::parse(field).lt(value)
    }

    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        FieldRef::parse(field).lte(value)
    }

    pub fn like(field: &str, pattern: &str) -> Self {
        FieldRef::parse(field).like(pattern)
    }

    pub fn ilike(field: &str, pattern: &str) -> Self {
        FieldRef::parse(field).ilike(pattern)
    }

    pub fn in_values<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        FieldRef::parse(field).in_values(values)
    }

    pub fn not_in_values<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        FieldRef::parse(field).not_in(values)
    }

    pub fn is_null(field: &str) -> Self {
        FieldRef::parse(field).is_null()
    }

    pub fn is_not_null(field: &str) -> Self {
        FieldRef::parse(field).is_not_null()
    }

    /// Every field reference in the filter, subqueries excluded
    pub fn fields(&self) -> Vec<&FieldRef> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a FieldRef>) {
        match self {
            QueryFilter::Condition(condition) => {
                for operand in std::iter::once(&condition.left).chain(condition.right.as_ref()) {
                    match operand {
                        Operand::Field(field) => out.push(field),
                        Operand::Aggregate(aggregate) => out.extend(aggregate.field.as_ref()),
                        _ => {}
                    }
                }
            }
            QueryFilter::Group { filters, .. } => {
                for filter in filters {
                    filter.collect_fields(out);
                }
            }
            QueryFilter::Not(inner) => inner.collect_fields(out),
            QueryFilter::Always(_) => {}
        }
    }

    /// Rewrite every field reference in place, subqueries excluded
    pub fn try_map_fields<E>(
        &mut self,
        f: &mut impl FnMut(&mut FieldRef) -> Result<(), E>,
    ) -> Result<(), E> {
        match self {
            QueryFilter::Condition(condition) => {
                for operand in std::iter::once(&mut condition.left).chain(condition.right.as_mut()) {
                    match operand {
                        Operand::Field(field) => f(field)?,
                        Operand::Aggregate(aggregate) => {
                            if let Some(field) = aggregate.field.as_mut() {
                                f(field)?;
                            }
                        }
                        _ => {}
                    }
                }
                Ok(())
            }
            QueryFilter::Group { filters, .. } => {
                for filter in filters {
                    filter.try_map_fields(f)?;
                }
                Ok(())
            }
            QueryFilter::Not(inner) => inner.try_map_fields(f),
            QueryFilter::Always(_) => Ok(()),
        }
    }

    /// Whether any condition compares an aggregate
    pub fn has_aggregate(&self) -> bool {
        match self {
            QueryFilter::Condition(condition) => std::iter::once(&condition.left)
                .chain(condition.right.as_ref())
                .any(|operand| matches!(operand, Operand::Aggregate(_))),
            QueryFilter::Group { filters, .. } => filters.iter().any(QueryFilter::has_aggregate),
            QueryFilter::Not(inner) => inner.has_aggregate(),
            QueryFilter::Always(_) => false,
        }
    }
}

impl BitAnd for QueryFilter {
    type Output = QueryFilter;

    fn bitand(self, rhs: QueryFilter) -> QueryFilter {
        match self {
            QueryFilter::Group {
                operator: LogicalOperator::And,
                mut filters,
            } => {
                filters.push(rhs);
                QueryFilter::and(filters)
            }
            other => QueryFilter::and(vec![other, rhs]),
        }
    }
}

impl BitOr for QueryFilter {
    type Output = QueryFilter;

    fn bitor(self, rhs: QueryFilter) -> QueryFilter {
        match self {
            QueryFilter::Group {
                operator: LogicalOperator::Or,
                mut filters,
            } => {
                filters.push(rhs);
                QueryFilter::or(filters)
            }
            other => QueryFilter::or(vec![other, rhs]),
        }
    }
}

impl Not for QueryFilter {
    type Output = QueryFilter;

    fn not(self) -> QueryFilter {
        self.negate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operators_build_groups() {
        let filter = QueryFilter::eq("id", 5) & QueryFilter::eq("active", true);
        assert!(matches!(
            filter,
            QueryFilter::Group {
                operator: LogicalOperator::And,
                ref filters,
            } if filters.len() == 2
        ));

        let filter = QueryFilter::eq("id", 5) | QueryFilter::eq("id", 6) | QueryFilter::eq("id", 7);
        match filter {
            QueryFilter::Group { operator, filters } => {
                assert_eq!(operator, LogicalOperator::Or);
                assert_eq!(filters.len(), 3);
            }
            other => panic!("unexpected filter {:?}", other),
        }

        assert!(matches!(!QueryFilter::is_null("email"), QueryFilter::Not(_)));
    }

    #[test]
    fn test_single_member_groups_collapse() {
        let filter = QueryFilter::or(vec![QueryFilter::eq("id", 1)]);
        assert!(matches!(filter, QueryFilter::Condition(_)));
    }

    #[test]
    fn test_fields_and_rewrite() {
        let mut filter = QueryFilter::eq("author.name", "Ada") & QueryFilter::gt("age", 30);
        let names: Vec<String> = filter.fields().iter().map(|f| f.path()).collect();
        assert_eq!(names, vec!["author.name", "age"]);

        filter
            .try_map_fields(&mut |field| -> Result<(), ()> {
                field.scope = Some("x".into());
                Ok(())
            })
            .unwrap();
        assert!(filter.fields().iter().all(|f| f.scope.as_deref() == Some("x")));
    }
}
