//! SQL rendering of logical queries
//!
//! Identifiers are always double-quoted. Values are either collected as `$n`
//! parameters for binding, or inlined as literals for display.

use crate::engine::{ColumnSchema, TableSchema};
use crate::query_builder::aggregation::{Aggregate, SelectField};
use crate::query_builder::field::FieldRef;
use crate::query_builder::filter::{LogicalOperator, Operand, QueryCondition, QueryFilter, QueryOperator};
use crate::query_builder::join::JoinClause;
use crate::query_builder::logical::LogicalQuery;
use crate::query_builder::ordering::OrderBy;
use type_mapping::{field_type_to_pg_type, FieldType, Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `$1`, `$2`, ... collected for binding
    Numbered,
    /// Literals written into the SQL text
    Inline,
}

/// A value to bind, with the column type when it is known
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    pub value: Value,
    pub hint: Option<FieldType>,
}

pub struct SqlGenerator {
    style: ParamStyle,
    params: Vec<BoundParam>,
}

impl SqlGenerator {
    pub fn new(style: ParamStyle) -> Self {
        Self {
            style,
            params: Vec::new(),
        }
    }

    pub fn params(&self) -> &[BoundParam] {
        &self.params
    }

    pub fn into_params(self) -> Vec<BoundParam> {
        self.params
    }

    pub fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn column(field: &FieldRef) -> String {
        match &field.scope {
            Some(scope) => format!("{}.{}", Self::quote_ident(scope), Self::quote_ident(&field.name)),
            None => Self::quote_ident(&field.name),
        }
    }

    fn param(&mut self, value: &Value, hint: Option<&FieldType>) -> String {
        match self.style {
            ParamStyle::Inline => Self::literal(value),
            ParamStyle::Numbered => {
                self.params.push(BoundParam {
                    value: value.clone(),
                    hint: hint.cloned(),
                });
                format!("${}", self.params.len())
            }
        }
    }

    /// SQL literal for a value
    pub fn literal(value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Boolean(true) => "TRUE".to_string(),
            Value::Boolean(false) => "FALSE".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) if f.is_finite() => f.to_string(),
            Value::Float(f) => format!("'{}'::float8", f),
            Value::Decimal(d) => d.to_string(),
            Value::Text(s) => Self::quote_text(s),
            Value::Date(_) | Value::Time(_) | Value::Timestamp(_) => {
                Self::quote_text(&value.to_string())
            }
            Value::Blob(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                format!("decode('{}', 'hex')", hex)
            }
            Value::Json(json) => format!("{}::jsonb", Self::quote_text(&json.to_string())),
            Value::Array(items) if items.is_empty() => "'{}'".to_string(),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(Self::literal).collect();
                format!("ARRAY[{}]", parts.join(", "))
            }
        }
    }

    fn quote_text(text: &str) -> String {
        format!("'{}'", text.replace('\'', "''"))
    }

    /// Build a complete SELECT statement
    pub fn select(&mut self, query: &LogicalQuery) -> String {
        let mut sql = String::from("SELECT ");
        if query.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.build_select_clause(&query.fields));
        sql.push_str(&format!(
            " FROM {} AS {}",
            Self::quote_ident(&query.table),
            Self::quote_ident(&query.alias)
        ));

        let joins = self.build_join_clause(&query.joins);
        if !joins.is_empty() {
            sql.push(' ');
            sql.push_str(&joins);
        }

        if let Some(filter) = &query.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filter(filter));
        }

        if !query.group_by.is_empty() {
            let fields: Vec<String> = query.group_by.iter().map(Self::column).collect();
            sql.push_str(&format!(" GROUP BY {}", fields.join(", ")));
        }

        if let Some(having) = &query.having {
            sql.push_str(" HAVING ");
            sql.push_str(&self.filter(having));
        }

        let order = Self::build_order_clause(&query.order_by);
        if !order.is_empty() {
            sql.push(' ');
            sql.push_str(&order);
        }

        let limit = Self::build_limit_clause(query.limit, query.offset);
        if !limit.is_empty() {
            sql.push(' ');
            sql.push_str(&limit);
        }
        sql
    }

    /// Build SELECT clause from fields
    pub fn build_select_clause(&self, fields: &[SelectField]) -> String {
        if fields.is_empty() {
            return "*".to_string();
        }

        fields
            .iter()
            .map(|field| {
                let expression = match field {
                    SelectField::Field { field, .. } => Self::column(field),
                    SelectField::Aggregate { aggregate, .. } => Self::aggregate(aggregate),
                };
                format!("{} AS {}", expression, Self::quote_ident(&field.key()))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn aggregate(aggregate: &Aggregate) -> String {
        let function = aggregate.function.to_sql();
        let field = aggregate
            .field
            .as_ref()
            .map(Self::column)
            .unwrap_or_else(|| "*".to_string());
        if aggregate.function.is_distinct() {
            format!("{}(DISTINCT {})", function, field)
        } else {
            format!("{}({})", function, field)
        }
    }

    /// Build JOIN clauses
    pub fn build_join_clause(&mut self, joins: &[JoinClause]) -> String {
        joins
            .iter()
            .map(|join| {
                let table = format!(
                    "{} AS {}",
                    Self::quote_ident(&join.table),
                    Self::quote_ident(&join.alias)
                );
                match &join.condition {
                    Some(condition) => format!(
                        "{} {} ON {}",
                        join.join_type.to_sql(),
                        table,
                        self.filter(condition)
                    ),
                    None => format!("{} {}", join.join_type.to_sql(), table),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build ORDER BY clause
    pub fn build_order_clause(order_by: &[OrderBy]) -> String {
        if order_by.is_empty() {
            return "".to_string();
        }

        let order_items: Vec<String> = order_by
            .iter()
            .map(|item| match item {
                OrderBy::Field { field, order } => {
                    format!("{} {}", Self::column(field), order.to_sql())
                }
                OrderBy::Random => "RANDOM()".to_string(),
            })
            .collect();

        format!("ORDER BY {}", order_items.join(", "))
    }

    /// Build LIMIT/OFFSET clause. PostgreSQL takes bigint here, so larger
    /// values are clamped.
    pub fn build_limit_clause(limit: Option<u64>, offset: Option<u64>) -> String {
        const BIGINT_MAX: u64 = i64::MAX as u64;
        let mut clauses = Vec::new();

        if let Some(limit) = limit {
            clauses.push(format!("LIMIT {}", limit.min(BIGINT_MAX)));
        }

        if let Some(offset) = offset.filter(|offset| *offset > 0) {
            clauses.push(format!("OFFSET {}", offset.min(BIGINT_MAX)));
        }

        clauses.join(" ")
    }

    pub fn filter(&mut self, filter: &QueryFilter) -> String {
        match filter {
            QueryFilter::Condition(condition) => self.condition(condition),
            QueryFilter::Group { operator, filters } => {
                if filters.is_empty() {
                    return match operator {
                        LogicalOperator::And => "1=1".to_string(),
                        LogicalOperator::Or => "1=0".to_string(),
                    };
                }
                let operator_str = match operator {
                    LogicalOperator::And => " AND ",
                    LogicalOperator::Or => " OR ",
                };

                let group_conditions = filters
                    .iter()
                    .map(|f| self.filter(f))
                    .collect::<Vec<_>>()
                    .join(operator_str);

                format!("({})", group_conditions)
            }
            QueryFilter::Not(inner) => format!("NOT ({})", self.filter(inner)),
            QueryFilter::Always(true) => "1=1".to_string(),
            QueryFilter::Always(false) => "1=0".to_string(),
        }
    }

    fn operand(&mut self, operand: &Operand) -> String {
        match operand {
            Operand::Field(field) => Self::column(field),
            Operand::Value(value) => self.param(value, None),
            Operand::List(values) => {
                let items: Vec<String> = values.iter().map(|v| self.param(v, None)).collect();
                format!("ARRAY[{}]", items.join(", "))
            }
            Operand::Aggregate(aggregate) => Self::aggregate(aggregate),
            Operand::Subquery(query) => format!("({})", self.select(query)),
        }
    }

    fn condition(&mut self, condition: &QueryCondition) -> String {
        let left = self.operand(&condition.left);
        let binary = |symbol: &str, this: &mut Self| match &condition.right {
            Some(right) => format!("{} {} {}", left, symbol, this.operand(right)),
            None => "1=0".to_string(),
        };

        match condition.operator {
            QueryOperator::Eq => binary("=", self),
            QueryOperator::Ne => binary("<>", self),
            QueryOperator::Gt => binary(">", self),
            QueryOperator::Gte => binary(">=", self),
            QueryOperator::Lt => binary("<", self),
            QueryOperator::Lte => binary("<=", self),
            QueryOperator::Like => binary("LIKE", self),
            QueryOperator::ILike => binary("ILIKE", self),
            QueryOperator::In | QueryOperator::NotIn => {
                let negated = condition.operator == QueryOperator::NotIn;
                match &condition.right {
                    Some(Operand::List(values)) if values.is_empty() => {
                        // Empty IN matches nothing, empty NOT IN matches everything
                        if negated { "1=1" } else { "1=0" }.to_string()
                    }
                    Some(Operand::List(values)) => {
                        let placeholders: Vec<String> =
                            values.iter().map(|v| self.param(v, None)).collect();
                        let keyword = if negated { "NOT IN" } else { "IN" };
                        format!("{} {} ({})", left, keyword, placeholders.join(", "))
                    }
                    Some(Operand::Subquery(query)) => {
                        let keyword = if negated { "NOT IN" } else { "IN" };
                        format!("{} {} ({})", left, keyword, self.select(query))
                    }
                    Some(other) => {
                        let operator = if negated { "<>" } else { "=" };
                        format!("{} {} {}", left, operator, self.operand(other))
                    }
                    None => if negated { "1=1" } else { "1=0" }.to_string(),
                }
            }
            QueryOperator::IsNull => format!("{} IS NULL", left),
            QueryOperator::IsNotNull => format!("{} IS NOT NULL", left),
            QueryOperator::Contains => match &condition.right {
                Some(right) => format!("{} = ANY({})", self.operand(right), left),
                None => "1=0".to_string(),
            },
            QueryOperator::ArrayOverlap => match &condition.right {
                Some(Operand::List(values)) if values.is_empty() => "1=0".to_string(),
                Some(right) => format!("{} && {}", left, self.operand(right)),
                None => "1=0".to_string(),
            },
        }
    }

    /// INSERT ... RETURNING "id"
    pub fn insert(&mut self, schema: Option<&TableSchema>, table: &str, record: &Record) -> String {
        if record.is_empty() {
            return format!(
                "INSERT INTO {} DEFAULT VALUES RETURNING \"id\"",
                Self::quote_ident(table)
            );
        }
        let columns: Vec<String> = record.keys().map(|name| Self::quote_ident(name)).collect();
        let values: Vec<String> = record
            .iter()
            .map(|(name, value)| {
                let hint = schema.and_then(|s| s.column(name)).map(|c| &c.field_type);
                self.param(value, hint)
            })
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING \"id\"",
            Self::quote_ident(table),
            columns.join(", "),
            values.join(", ")
        )
    }

    pub fn update(
        &mut self,
        schema: Option<&TableSchema>,
        table: &str,
        filter: &QueryFilter,
        record: &Record,
    ) -> String {
        let assignments: Vec<String> = record
            .iter()
            .map(|(name, value)| {
                let hint = schema.and_then(|s| s.column(name)).map(|c| &c.field_type);
                format!("{} = {}", Self::quote_ident(name), self.param(value, hint))
            })
            .collect();
        format!(
            "UPDATE {} SET {} WHERE {}",
            Self::quote_ident(table),
            assignments.join(", "),
            self.filter(filter)
        )
    }

    pub fn delete(&mut self, table: &str, filter: &QueryFilter) -> String {
        format!(
            "DELETE FROM {} WHERE {}",
            Self::quote_ident(table),
            self.filter(filter)
        )
    }

    fn column_definition(column: &ColumnSchema) -> String {
        let mut definition = match (&column.field_type, column.options.get("length")) {
            (FieldType::String, Some(length)) if length.is_u64() => {
                format!("{} VARCHAR({})", Self::quote_ident(&column.name), length)
            }
            (field_type, _) => format!(
                "{} {}",
                Self::quote_ident(&column.name),
                field_type_to_pg_type(field_type)
            ),
        };
        if column.field_type == FieldType::Id {
            definition.push_str(" PRIMARY KEY");
            return definition;
        }
        if column.required {
            definition.push_str(" NOT NULL");
        }
        if column.options.get("unique").and_then(serde_json::Value::as_bool) == Some(true) {
            definition.push_str(" UNIQUE");
        }
        definition
    }

    pub fn create_table(schema: &TableSchema) -> String {
        let columns: Vec<String> = schema.columns.iter().map(Self::column_definition).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            Self::quote_ident(&schema.name),
            columns.join(", ")
        )
    }

    /// New columns are added nullable; existing rows have no value for them
    pub fn add_column(table: &str, column: &ColumnSchema) -> String {
        let nullable = ColumnSchema {
            required: false,
            ..column.clone()
        };
        format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
            Self::quote_ident(table),
            Self::column_definition(&nullable)
        )
    }
}
