use crate::query_builder::field::FieldRef;
use crate::query_builder::filter::{Operand, QueryCondition, QueryFilter, QueryOperator};
use serde::{Deserialize, Serialize};
use type_mapping::Value;

/// Represents SQL aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// COUNT(*) or COUNT(field)
    Count,
    /// SUM(field)
    Sum,
    /// AVG(field)
    Avg,
    /// MIN(field)
    Min,
    /// MAX(field)
    Max,
    /// COUNT(DISTINCT field)
    CountDistinct,
}

impl AggregateFunction {
    /// Convert aggregate function to SQL string
    pub fn to_sql(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::CountDistinct => "COUNT",
        }
    }

    /// Check if this is a DISTINCT aggregate
    pub fn is_distinct(&self) -> bool {
        matches!(self, AggregateFunction::CountDistinct)
    }
}

/// An aggregate over one column, or over rows for `COUNT(*)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub function: AggregateFunction,
    pub field: Option<FieldRef>,
}

impl Aggregate {
    pub fn new(function: AggregateFunction, field: Option<FieldRef>) -> Self {
        Self { function, field }
    }

    /// COUNT(*)
    pub fn count_all() -> Self {
        Self::new(AggregateFunction::Count, None)
    }

    /// Key the aggregate is returned under when no alias is given, e.g. `count(post.id)`
    pub fn label(&self) -> String {
        let function = match self.function {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::CountDistinct => "count_distinct",
        };
        match &self.field {
            Some(field) => format!("{}({})", function, field.path()),
            None => format!("{}(*)", function),
        }
    }

    fn compare(&self, operator: QueryOperator, value: Value) -> QueryFilter {
        QueryFilter::Condition(QueryCondition {
            left: Operand::Aggregate(self.clone()),
            operator,
            right: Some(Operand::Value(value)),
        })
    }

    /// HAVING comparisons
    pub fn eq(&self, value: impl Into<Value>) -> QueryFilter {
        self.compare(QueryOperator::Eq, value.into())
    }

    pub fn gt(&self, value: impl Into<Value>) -> QueryFilter {
        self.compare(QueryOperator::Gt, value.into())
    }

    pub fn gte(&self, value: impl Into<Value>) -> QueryFilter {
        self.compare(QueryOperator::Gte, value.into())
    }

    pub fn lt(&self, value: impl Into<Value>) -> QueryFilter {
        self.compare(QueryOperator::Lt, value.into())
    }

    pub fn lte(&self, value: impl Into<Value>) -> QueryFilter {
        self.compare(QueryOperator::Lte, value.into())
    }
}

/// Represents a field selection in a SELECT clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectField {
    /// A column, returned as `alias.column` unless renamed
    Field {
        field: FieldRef,
        alias: Option<String>,
    },
    /// An aggregate, returned under its label unless renamed
    Aggregate {
        aggregate: Aggregate,
        alias: Option<String>,
    },
}

impl SelectField {
    /// Create a simple field selection
    pub fn field(field: impl Into<FieldRef>) -> Self {
        SelectField::Field {
            field: field.into(),
            alias: None,
        }
    }

    /// Create a field with alias
    pub fn field_as(field: impl Into<FieldRef>, alias: impl Into<String>) -> Self {
        SelectField::Field {
            field: field.into(),
            alias: Some(alias.into()),
        }
    }

    pub fn aggregate(aggregate: Aggregate) -> Self {
        SelectField::Aggregate {
            aggregate,
            alias: None,
        }
    }

    /// Add an alias to this select field
    pub fn with_alias(self, alias: impl Into<String>) -> Self {
        match self {
            SelectField::Field { field, .. } => SelectField::Field {
                field,
                alias: Some(alias.into()),
            },
            SelectField::Aggregate { aggregate, .. } => SelectField::Aggregate {
                aggregate,
                alias: Some(alias.into()),
            },
        }
    }

    /// Key this selection appears under in a raw row
    pub fn key(&self) -> String {
        match self {
            SelectField::Field { alias: Some(alias), .. }
            | SelectField::Aggregate { alias: Some(alias), .. } => alias.clone(),
            SelectField::Field { field, .. } => field.path(),
            SelectField::Aggregate { aggregate, .. } => aggregate.label(),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, SelectField::Aggregate { .. })
    }

    pub fn as_field(&self) -> Option<&FieldRef> {
        match self {
            SelectField::Field { field, .. } => Some(field),
            SelectField::Aggregate { .. } => None,
        }
    }

    pub(crate) fn field_mut(&mut self) -> Option<&mut FieldRef> {
        match self {
            SelectField::Field { field, .. } => Some(field),
            SelectField::Aggregate { aggregate, .. } => aggregate.field.as_mut(),
        }
    }
}

impl From<&str> for SelectField {
    fn from(path: &str) -> Self {
        SelectField::field(path)
    }
}

impl From<FieldRef> for SelectField {
    fn from(field: FieldRef) -> Self {
        SelectField::field(field)
    }
}

impl From<Aggregate> for SelectField {
    fn from(aggregate: Aggregate) -> Self {
        SelectField::aggregate(aggregate)
    }
}
