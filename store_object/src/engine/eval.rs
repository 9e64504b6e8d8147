//! In-process evaluation of filters and aggregates
//!
//! Follows SQL semantics: comparisons involving NULL are unknown, AND/OR/NOT
//! use three-valued logic and a row passes only when its filter is true.

use crate::errors::EngineError;
use crate::query_builder::aggregation::{Aggregate, AggregateFunction};
use crate::query_builder::field::FieldRef;
use crate::query_builder::filter::{LogicalOperator, Operand, QueryCondition, QueryFilter, QueryOperator};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use type_mapping::{Record, Value};

/// One row of the joined relation: each alias maps to its table row,
/// or to `None` when an outer join found no match
#[derive(Debug, Clone, Default)]
pub struct JoinedRow {
    pub(crate) tables: BTreeMap<String, Option<Record>>,
}

impl JoinedRow {
    pub fn new(alias: &str, record: Record) -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(alias.to_string(), Some(record));
        Self { tables }
    }

    pub fn with(&self, alias: &str, record: Option<Record>) -> Self {
        let mut row = self.clone();
        row.tables.insert(alias.to_string(), record);
        row
    }

    /// Value of a column. `default_alias` scopes unqualified references.
    pub fn value(&self, field: &FieldRef, default_alias: &str) -> Result<Value, EngineError> {
        let alias = field.scope.as_deref().unwrap_or(default_alias);
        match self.tables.get(alias) {
            None => Err(EngineError::UnknownAlias(alias.to_string())),
            Some(None) => Ok(Value::Null),
            Some(Some(record)) => record.get(&field.name).cloned().ok_or_else(|| {
                EngineError::UnknownColumn {
                    table: alias.to_string(),
                    column: field.name.clone(),
                }
            }),
        }
    }
}

/// What a filter is evaluated against: a row, and the group it belongs to when grouped
pub struct EvalContext<'a> {
    pub row: &'a JoinedRow,
    pub group: Option<&'a [JoinedRow]>,
    pub default_alias: &'a str,
}

impl<'a> EvalContext<'a> {
    pub fn row(row: &'a JoinedRow, default_alias: &'a str) -> Self {
        Self {
            row,
            group: None,
            default_alias,
        }
    }

    pub fn group(rows: &'a [JoinedRow], representative: &'a JoinedRow, default_alias: &'a str) -> Self {
        Self {
            row: representative,
            group: Some(rows),
            default_alias,
        }
    }

    fn operand(&self, operand: &Operand) -> Result<Value, EngineError> {
        match operand {
            Operand::Field(field) => self.row.value(field, self.default_alias),
            Operand::Value(value) => Ok(value.clone()),
            Operand::List(values) => Ok(Value::Array(values.clone())),
            Operand::Aggregate(aggregate) => {
                let rows = self.group.unwrap_or(std::slice::from_ref(self.row));
                aggregate_value(aggregate, rows, self.default_alias)
            }
            Operand::Subquery(_) => Err(EngineError::Unsupported(
                "subqueries must be resolved before evaluation".to_string(),
            )),
        }
    }

    /// Three-valued result: `None` is SQL unknown
    pub fn eval(&self, filter: &QueryFilter) -> Result<Option<bool>, EngineError> {
        match filter {
            QueryFilter::Condition(condition) => self.condition(condition),
            QueryFilter::Group { operator, filters } => {
                let mut unknown = false;
                for filter in filters {
                    match (operator, self.eval(filter)?) {
                        (LogicalOperator::And, Some(false)) => return Ok(Some(false)),
                        (LogicalOperator::Or, Some(true)) => return Ok(Some(true)),
                        (_, None) => unknown = true,
                        _ => {}
                    }
                }
                if unknown {
                    Ok(None)
                } else {
                    Ok(Some(*operator == LogicalOperator::And))
                }
            }
            QueryFilter::Not(inner) => Ok(self.eval(inner)?.map(|b| !b)),
            QueryFilter::Always(b) => Ok(Some(*b)),
        }
    }

    /// Whether the filter holds (unknown counts as not holding)
    pub fn matches(&self, filter: &QueryFilter) -> Result<bool, EngineError> {
        Ok(self.eval(filter)? == Some(true))
    }

    fn condition(&self, condition: &QueryCondition) -> Result<Option<bool>, EngineError> {
        let left = self.operand(&condition.left)?;
        let right = match &condition.right {
            Some(operand) => self.operand(operand)?,
            None => Value::Null,
        };

        let ordered = |test: fn(Ordering) -> bool| left.compare(&right).map(test);

        let result = match condition.operator {
            QueryOperator::IsNull => Some(left.is_null()),
            QueryOperator::IsNotNull => Some(!left.is_null()),
            _ if left.is_null() => None,
            QueryOperator::Eq if right.is_null() => None,
            QueryOperator::Eq => Some(left.sql_eq(&right)),
            QueryOperator::Ne if right.is_null() => None,
            QueryOperator::Ne => Some(!left.sql_eq(&right)),
            QueryOperator::Gt => ordered(|o| o == Ordering::Greater),
            QueryOperator::Gte => ordered(|o| o != Ordering::Less),
            QueryOperator::Lt => ordered(|o| o == Ordering::Less),
            QueryOperator::Lte => ordered(|o| o != Ordering::Greater),
            QueryOperator::Like | QueryOperator::ILike => match (left.as_str(), right.as_str()) {
                (Some(text), Some(pattern)) => Some(like_match(
                    text,
                    pattern,
                    condition.operator == QueryOperator::ILike,
                )),
                _ => None,
            },
            QueryOperator::In => in_list(&left, &right),
            QueryOperator::NotIn => in_list(&left, &right).map(|found| !found),
            QueryOperator::Contains => match (&left, &right) {
                (_, Value::Null) => None,
                (Value::Array(items), needle) => Some(items.iter().any(|item| item.sql_eq(needle))),
                _ => None,
            },
            QueryOperator::ArrayOverlap => match (&left, &right) {
                (Value::Array(items), Value::Array(others)) => Some(
                    items
                        .iter()
                        .any(|item| others.iter().any(|other| item.sql_eq(other))),
                ),
                _ => None,
            },
        };
        Ok(result)
    }
}

/// SQL `IN`: true on a match, unknown when no match but the list holds NULL
fn in_list(needle: &Value, list: &Value) -> Option<bool> {
    let items: &[Value] = match list {
        Value::Array(items) => items,
        Value::Null => return None,
        single => std::slice::from_ref(single),
    };
    if items.iter().any(|item| needle.sql_eq(item)) {
        Some(true)
    } else if items.iter().any(Value::is_null) {
        None
    } else {
        Some(false)
    }
}

/// SQL LIKE with `%` and `_` wildcards
pub fn like_match(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let fold = |s: &str| -> Vec<char> {
        if case_insensitive {
            s.to_lowercase().chars().collect()
        } else {
            s.chars().collect()
        }
    };
    let text = fold(text);
    let pattern = fold(pattern);

    // Classic two-pointer wildcard match with backtracking on '%'
    let (mut t, mut p) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

/// Evaluate an aggregate over the rows of one group
pub fn aggregate_value(
    aggregate: &Aggregate,
    rows: &[JoinedRow],
    default_alias: &str,
) -> Result<Value, EngineError> {
    let Some(field) = &aggregate.field else {
        return Ok(Value::Integer(rows.len() as i64));
    };

    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let value = row.value(field, default_alias)?;
        if !value.is_null() {
            values.push(value);
        }
    }

    let result = match aggregate.function {
        AggregateFunction::Count => Value::Integer(values.len() as i64),
        AggregateFunction::CountDistinct => {
            let mut distinct: Vec<Value> = Vec::new();
            for value in values {
                if !distinct.iter().any(|seen| seen.sql_eq(&value)) {
                    distinct.push(value);
                }
            }
            Value::Integer(distinct.len() as i64)
        }
        AggregateFunction::Sum => sum(&values)?,
        AggregateFunction::Avg => {
            if values.is_empty() {
                Value::Null
            } else {
                match sum(&values)? {
                    Value::Float(total) => Value::Float(total / values.len() as f64),
                    Value::Integer(total) => {
                        Value::Decimal(Decimal::from(total) / Decimal::from(values.len() as i64))
                    }
                    Value::Decimal(total) => Value::Decimal(total / Decimal::from(values.len() as i64)),
                    other => other,
                }
            }
        }
        AggregateFunction::Min => extreme(values, Ordering::Less),
        AggregateFunction::Max => extreme(values, Ordering::Greater),
    };
    Ok(result)
}

fn sum(values: &[Value]) -> Result<Value, EngineError> {
    if values.is_empty() {
        return Ok(Value::Null);
    }
    if let Some(other) = values
        .iter()
        .find(|v| !matches!(v, Value::Integer(_) | Value::Float(_) | Value::Decimal(_)))
    {
        return Err(EngineError::Type(format!("cannot sum {} values", other.type_name())));
    }

    if values.iter().any(|v| matches!(v, Value::Float(_))) {
        return Ok(Value::Float(values.iter().filter_map(Value::as_f64).sum()));
    }
    if values.iter().all(|v| matches!(v, Value::Integer(_))) {
        let total = values
            .iter()
            .filter_map(Value::as_i64)
            .try_fold(0i64, |acc, v| acc.checked_add(v));
        if let Some(total) = total {
            return Ok(Value::Integer(total));
        }
    }
    let total = values.iter().fold(Decimal::ZERO, |acc, v| match v {
        Value::Integer(i) => acc + Decimal::from(*i),
        Value::Decimal(d) => acc + d,
        _ => acc,
    });
    Ok(Value::Decimal(total))
}

fn extreme(values: Vec<Value>, keep: Ordering) -> Value {
    let mut best: Option<Value> = None;
    for value in values {
        best = match best {
            Some(current) if value.compare(&current) != Some(keep) => Some(current),
            _ => Some(value),
        };
    }
    best.unwrap_or(Value::Null)
}

/// Order two values for ORDER BY: NULLs sort after everything in ascending order
pub fn order_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
    }
}
