use crate::query_builder::filter::QueryFilter;
use serde::{Deserialize, Serialize};

/// Represents the type of SQL JOIN operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum JoinType {
    /// INNER JOIN - returns records that have matching values in both tables
    Inner,
    /// LEFT JOIN - returns all records from the left table and matched records from the right table
    #[default]
    Left,
    /// CROSS JOIN - returns Cartesian product of both tables
    Cross,
}

impl JoinType {
    /// Convert JoinType to SQL string
    pub fn to_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Cross => "CROSS JOIN",
        }
    }
}

/// Represents a complete JOIN clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    /// Type of join (INNER, LEFT, CROSS)
    pub join_type: JoinType,
    /// Table to join with
    pub table: String,
    /// Alias the joined rows are read through, unique within the query
    pub alias: String,
    /// ON condition; cross joins have none
    pub condition: Option<QueryFilter>,
}

impl JoinClause {
    pub fn new(join_type: JoinType, table: &str, alias: &str, condition: QueryFilter) -> Self {
        Self {
            join_type,
            table: table.to_string(),
            alias: alias.to_string(),
            condition: Some(condition),
        }
    }

    pub fn cross(table: &str, alias: &str) -> Self {
        Self {
            join_type: JoinType::Cross,
            table: table.to_string(),
            alias: alias.to_string(),
            condition: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_type_to_sql() {
        assert_eq!(JoinType::Inner.to_sql(), "INNER JOIN");
        assert_eq!(JoinType::Left.to_sql(), "LEFT JOIN");
        assert_eq!(JoinType::Cross.to_sql(), "CROSS JOIN");
        assert_eq!(JoinType::default(), JoinType::Left);
    }

    #[test]
    fn test_join_clause_constructors() {
        let join = JoinClause::new(
            JoinType::Inner,
            "person",
            "author_1",
            QueryFilter::eq("author_1.id", 1),
        );
        assert_eq!(join.alias, "author_1");
        assert!(join.condition.is_some());

        let cross = JoinClause::cross("tag", "tag");
        assert_eq!(cross.join_type, JoinType::Cross);
        assert!(cross.condition.is_none());
    }
}
