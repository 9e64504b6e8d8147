//! PostgreSQL engine over a `sqlx` pool

use crate::engine::{Engine, TableHandle, TableSchema};
use crate::errors::EngineError;
use crate::query_builder::filter::QueryFilter;
use crate::query_builder::logical::{LogicalQuery, RawRow};
use crate::query_builder::sql_generation::{BoundParam, ParamStyle, SqlGenerator};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use config::DatabaseConfig;
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::time::Duration;
use type_mapping::{FieldType, Record, Value};

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

#[derive(Debug)]
pub struct PgEngine {
    pool: PgPool,
    /// Column types of known tables, used to type NULL and array parameters
    schemas: RwLock<BTreeMap<String, TableSchema>>,
}

impl PgEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schemas: RwLock::new(BTreeMap::new()),
        }
    }

    /// Open a pool with the configured limits
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, EngineError> {
        let connection_string = config.connection_string();

        let mut pool_options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds));

        // Set max lifetime if specified
        if config.max_lifetime_seconds > 0 {
            pool_options =
                pool_options.max_lifetime(Duration::from_secs(config.max_lifetime_seconds));
        }

        let pool = pool_options.connect(&connection_string).await?;
        tracing::info!("Connected to PostgreSQL at {}:{}", config.host, config.port);
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<(), EngineError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn schema(&self, table: &str) -> Option<TableSchema> {
        self.schemas
            .read()
            .ok()
            .and_then(|schemas| schemas.get(table).cloned())
    }

    fn remember(&self, schema: &TableSchema) {
        if let Ok(mut schemas) = self.schemas.write() {
            schemas.insert(schema.name.clone(), schema.clone());
        }
    }

    async fn existing_columns(&self, table: &str) -> Result<BTreeSet<String>, EngineError> {
        let rows = sqlx::query(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(EngineError::from))
            .collect()
    }
}

fn bind_null<'q>(query: PgQuery<'q>, hint: Option<&FieldType>) -> PgQuery<'q> {
    match hint {
        Some(FieldType::Boolean) => query.bind(Option::<bool>::None),
        Some(FieldType::Integer) => query.bind(Option::<i32>::None),
        Some(FieldType::Id | FieldType::BigInteger | FieldType::Reference(_)) => {
            query.bind(Option::<i64>::None)
        }
        Some(FieldType::Double) => query.bind(Option::<f64>::None),
        Some(FieldType::Decimal { .. }) => query.bind(Option::<Decimal>::None),
        Some(FieldType::Date) => query.bind(Option::<NaiveDate>::None),
        Some(FieldType::Time) => query.bind(Option::<NaiveTime>::None),
        Some(FieldType::DateTime) => query.bind(Option::<NaiveDateTime>::None),
        Some(FieldType::Blob) => query.bind(Option::<Vec<u8>>::None),
        Some(FieldType::Json) => query.bind(Option::<serde_json::Value>::None),
        Some(FieldType::ListOfString) => query.bind(Option::<Vec<String>>::None),
        Some(FieldType::ListOfInteger | FieldType::ListOfReference(_)) => {
            query.bind(Option::<Vec<i64>>::None)
        }
        _ => query.bind(Option::<String>::None),
    }
}

fn bind_param<'q>(query: PgQuery<'q>, param: BoundParam) -> PgQuery<'q> {
    let hint = param.hint.as_ref();
    match param.value {
        Value::Null => bind_null(query, hint),
        Value::Boolean(b) => query.bind(b),
        Value::Integer(i) => match (hint, i32::try_from(i)) {
            (Some(FieldType::Integer), Ok(small)) => query.bind(small),
            _ => query.bind(i),
        },
        Value::Float(f) => query.bind(f),
        Value::Decimal(d) => query.bind(d),
        Value::Text(s) => query.bind(s),
        Value::Date(d) => query.bind(d),
        Value::Time(t) => query.bind(t),
        Value::Timestamp(ts) => query.bind(ts),
        Value::Blob(bytes) => query.bind(bytes),
        Value::Json(json) => query.bind(json),
        Value::Array(items) => {
            let textual = matches!(hint, Some(FieldType::ListOfString))
                || (!items.is_empty() && items.iter().all(|item| matches!(item, Value::Text(_))));
            if textual {
                let items: Vec<String> = items
                    .into_iter()
                    .filter(|item| !item.is_null())
                    .map(|item| item.to_string())
                    .collect();
                query.bind(items)
            } else {
                let items: Vec<i64> = items.iter().filter_map(Value::as_i64).collect();
                query.bind(items)
            }
        }
    }
}

fn bind_all<'q>(sql: &'q str, params: Vec<BoundParam>) -> PgQuery<'q> {
    params.into_iter().fold(sqlx::query(sql), bind_param)
}

fn decode_column(row: &PgRow, index: usize) -> Result<Value, EngineError> {
    let column = &row.columns()[index];
    let type_name = column.type_info().name().to_ascii_uppercase();
    let value = match type_name.as_str() {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Boolean),
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(|v| Value::Integer(v.into())),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(|v| Value::Integer(v.into())),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::Integer),
        "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(|v| Value::Float(v.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::Float),
        "NUMERIC" => row.try_get::<Option<Decimal>, _>(index)?.map(Value::Decimal),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row.try_get::<Option<String>, _>(index)?.map(Value::Text),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(Value::Date),
        "TIME" => row.try_get::<Option<NaiveTime>, _>(index)?.map(Value::Time),
        "TIMESTAMP" => row.try_get::<Option<NaiveDateTime>, _>(index)?.map(Value::Timestamp),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(|ts| Value::Timestamp(ts.naive_utc())),
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(index)?.map(Value::Blob),
        "JSON" | "JSONB" => row.try_get::<Option<serde_json::Value>, _>(index)?.map(Value::Json),
        "TEXT[]" | "VARCHAR[]" => row
            .try_get::<Option<Vec<String>>, _>(index)?
            .map(|items| Value::Array(items.into_iter().map(Value::Text).collect())),
        "INT8[]" => row
            .try_get::<Option<Vec<i64>>, _>(index)?
            .map(|items| Value::Array(items.into_iter().map(Value::Integer).collect())),
        "INT4[]" => row
            .try_get::<Option<Vec<i32>>, _>(index)?
            .map(|items| Value::Array(items.into_iter().map(|i| Value::Integer(i.into())).collect())),
        other => {
            return Err(EngineError::Type(format!(
                "column '{}' has unsupported type {}",
                column.name(),
                other
            )))
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

fn decode_row(row: &PgRow) -> Result<RawRow, EngineError> {
    (0..row.columns().len())
        .map(|index| Ok((row.columns()[index].name().to_string(), decode_column(row, index)?)))
        .collect()
}

#[async_trait]
impl Engine for PgEngine {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn define_table(&self, schema: &TableSchema) -> Result<TableHandle, EngineError> {
        let existing = self.existing_columns(&schema.name).await?;
        self.remember(schema);

        if existing.is_empty() {
            let sql = SqlGenerator::create_table(schema);
            crate::debug_log!("{}", sql);
            sqlx::query(&sql).execute(&self.pool).await?;
            return Ok(TableHandle {
                name: schema.name.clone(),
                created: true,
                added_columns: Vec::new(),
            });
        }

        let mut added_columns = Vec::new();
        for column in schema.columns.iter().filter(|c| !existing.contains(&c.name)) {
            let sql = SqlGenerator::add_column(&schema.name, column);
            crate::debug_log!("{}", sql);
            sqlx::query(&sql).execute(&self.pool).await?;
            added_columns.push(column.name.clone());
        }
        Ok(TableHandle {
            name: schema.name.clone(),
            created: false,
            added_columns,
        })
    }

    fn attach_table(&self, schema: &TableSchema) -> Result<(), EngineError> {
        self.remember(schema);
        Ok(())
    }

    async fn select(&self, query: &LogicalQuery) -> Result<Vec<RawRow>, EngineError> {
        let mut generator = SqlGenerator::new(ParamStyle::Numbered);
        let sql = generator.select(query);
        crate::trace_log!("{}", sql);
        let rows = bind_all(&sql, generator.into_params())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    fn to_sql(&self, query: &LogicalQuery) -> Result<String, EngineError> {
        Ok(SqlGenerator::new(ParamStyle::Inline).select(query))
    }

    async fn insert(&self, table: &str, record: &Record) -> Result<i64, EngineError> {
        let schema = self.schema(table);
        let mut generator = SqlGenerator::new(ParamStyle::Numbered);
        let sql = generator.insert(schema.as_ref(), table, record);
        crate::trace_log!("{}", sql);
        let row = bind_all(&sql, generator.into_params())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    async fn update(&self, table: &str, filter: &QueryFilter, record: &Record) -> Result<u64, EngineError> {
        if record.is_empty() {
            return Ok(0);
        }
        let schema = self.schema(table);
        let mut generator = SqlGenerator::new(ParamStyle::Numbered);
        let sql = generator.update(schema.as_ref(), table, filter, record);
        crate::trace_log!("{}", sql);
        let result = bind_all(&sql, generator.into_params())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, table: &str, filter: &QueryFilter) -> Result<u64, EngineError> {
        let mut generator = SqlGenerator::new(ParamStyle::Numbered);
        let sql = generator.delete(table, filter);
        crate::trace_log!("{}", sql);
        let result = bind_all(&sql, generator.into_params())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
