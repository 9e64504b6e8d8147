//! In-process engine
//!
//! Tables live in memory behind a lock. Queries are evaluated row by row with
//! the same semantics the PostgreSQL engine gets from the database: outer joins
//! null-extend, NULL comparisons are unknown, `COUNT` over nothing is zero.

use crate::engine::eval::{aggregate_value, order_values, EvalContext, JoinedRow};
use crate::engine::{Engine, TableHandle, TableSchema};
use crate::errors::EngineError;
use crate::query_builder::aggregation::SelectField;
use crate::query_builder::filter::{Operand, QueryFilter};
use crate::query_builder::join::JoinType;
use crate::query_builder::logical::{LogicalQuery, RawRow};
use crate::query_builder::ordering::{OrderBy, SortOrder};
use crate::query_builder::sql_generation::{ParamStyle, SqlGenerator};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::sync::RwLock;
use type_mapping::{Record, Value};

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Record>,
    next_id: i64,
}

impl MemoryTable {
    fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            next_id: 1,
        }
    }

    fn check_columns(&self, record: &Record) -> Result<(), EngineError> {
        match record.keys().find(|name| self.schema.column(name).is_none()) {
            Some(name) => Err(EngineError::UnknownColumn {
                table: self.schema.name.clone(),
                column: name.clone(),
            }),
            None => Ok(()),
        }
    }
}

type Tables = BTreeMap<String, MemoryTable>;

#[derive(Debug, Default)]
pub struct MemoryEngine {
    tables: RwLock<Tables>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored in `table`
    pub fn row_count(&self, table: &str) -> Result<usize, EngineError> {
        let tables = self.read()?;
        tables
            .get(table)
            .map(|t| t.rows.len())
            .ok_or_else(|| EngineError::UnknownTable(table.to_string()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, EngineError> {
        self.tables
            .read()
            .map_err(|_| EngineError::Internal("memory engine lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, EngineError> {
        self.tables
            .write()
            .map_err(|_| EngineError::Internal("memory engine lock poisoned".to_string()))
    }
}

fn table<'a>(tables: &'a Tables, name: &str) -> Result<&'a MemoryTable, EngineError> {
    tables
        .get(name)
        .ok_or_else(|| EngineError::UnknownTable(name.to_string()))
}

/// Replace every subquery operand with the list of values it selects
fn resolve_subqueries(tables: &Tables, filter: &mut QueryFilter) -> Result<(), EngineError> {
    match filter {
        QueryFilter::Condition(condition) => {
            for operand in std::iter::once(&mut condition.left).chain(condition.right.as_mut()) {
                if let Operand::Subquery(query) = operand {
                    let key = query
                        .fields
                        .first()
                        .map(SelectField::key)
                        .ok_or_else(|| EngineError::Unsupported("subquery selects no column".to_string()))?;
                    let values = run(tables, query)?
                        .into_iter()
                        .map(|mut row| row.remove(&key).unwrap_or_default())
                        .collect();
                    *operand = Operand::List(values);
                }
            }
            Ok(())
        }
        QueryFilter::Group { filters, .. } => filters
            .iter_mut()
            .try_for_each(|filter| resolve_subqueries(tables, filter)),
        QueryFilter::Not(inner) => resolve_subqueries(tables, inner),
        QueryFilter::Always(_) => Ok(()),
    }
}

fn resolved(tables: &Tables, filter: &Option<QueryFilter>) -> Result<Option<QueryFilter>, EngineError> {
    match filter {
        Some(filter) => {
            let mut filter = filter.clone();
            resolve_subqueries(tables, &mut filter)?;
            Ok(Some(filter))
        }
        None => Ok(None),
    }
}

fn run(tables: &Tables, query: &LogicalQuery) -> Result<Vec<RawRow>, EngineError> {
    let alias = query.alias.as_str();
    let base = table(tables, &query.table)?;
    let mut rows: Vec<JoinedRow> = base
        .rows
        .iter()
        .map(|record| JoinedRow::new(alias, record.clone()))
        .collect();

    for join in &query.joins {
        let target = table(tables, &join.table)?;
        let condition = resolved(tables, &join.condition)?;
        let mut joined = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut matched = false;
            for record in &target.rows {
                let candidate = row.with(&join.alias, Some(record.clone()));
                let keep = match (&condition, join.join_type) {
                    (_, JoinType::Cross) | (None, _) => true,
                    (Some(condition), _) => EvalContext::row(&candidate, alias).matches(condition)?,
                };
                if keep {
                    matched = true;
                    joined.push(candidate);
                }
            }
            if !matched && join.join_type == JoinType::Left {
                joined.push(row.with(&join.alias, None));
            }
        }
        rows = joined;
    }

    if let Some(filter) = resolved(tables, &query.filter)? {
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if EvalContext::row(&row, alias).matches(&filter)? {
                kept.push(row);
            }
        }
        rows = kept;
    }

    let mut projected = if query.is_aggregated() {
        grouped(tables, query, rows)?
    } else {
        order(&mut rows, &query.order_by, alias)?;
        rows.iter()
            .map(|row| project(query, row, None))
            .collect::<Result<Vec<_>, _>>()?
    };

    if query.distinct {
        let mut unique: Vec<RawRow> = Vec::with_capacity(projected.len());
        for row in projected {
            if !unique.contains(&row) {
                unique.push(row);
            }
        }
        projected = unique;
    }

    let offset = query.offset.map_or(0, |offset| usize::try_from(offset).unwrap_or(usize::MAX));
    let limit = query.limit.map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
    Ok(projected.into_iter().skip(offset).take(limit).collect())
}

fn grouped(tables: &Tables, query: &LogicalQuery, rows: Vec<JoinedRow>) -> Result<Vec<RawRow>, EngineError> {
    let alias = query.alias.as_str();
    let mut groups: Vec<(Vec<Value>, Vec<JoinedRow>)> = Vec::new();
    for row in rows {
        let key = query
            .group_by
            .iter()
            .map(|field| row.value(field, alias))
            .collect::<Result<Vec<_>, _>>()?;
        match groups.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, members)) => members.push(row),
            None => groups.push((key, vec![row])),
        }
    }
    // Aggregates without GROUP BY always produce one row
    if groups.is_empty() && query.group_by.is_empty() {
        groups.push((Vec::new(), Vec::new()));
    }

    let having = resolved(tables, &query.having)?;
    let empty = JoinedRow::default();
    let mut kept: Vec<(JoinedRow, Vec<JoinedRow>)> = Vec::with_capacity(groups.len());
    for (_, members) in groups {
        let representative = members.first().cloned().unwrap_or_else(|| empty.clone());
        if let Some(having) = &having {
            if !EvalContext::group(&members, &representative, alias).matches(having)? {
                continue;
            }
        }
        kept.push((representative, members));
    }

    if query.order_by.iter().any(|item| matches!(item, OrderBy::Random)) {
        kept.shuffle(&mut rand::rng());
    } else if !query.order_by.is_empty() {
        let mut keyed = Vec::with_capacity(kept.len());
        for (representative, members) in kept {
            let keys = sort_keys(&representative, &query.order_by, alias)?;
            keyed.push((keys, (representative, members)));
        }
        keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, &query.order_by));
        kept = keyed.into_iter().map(|(_, group)| group).collect();
    }

    kept.iter()
        .map(|(representative, members)| project(query, representative, Some(members)))
        .collect()
}

fn sort_keys(row: &JoinedRow, order_by: &[OrderBy], alias: &str) -> Result<Vec<Value>, EngineError> {
    order_by
        .iter()
        .filter_map(OrderBy::field)
        .map(|field| row.value(field, alias))
        .collect()
}

fn compare_keys(a: &[Value], b: &[Value], order_by: &[OrderBy]) -> std::cmp::Ordering {
    let directions = order_by.iter().filter_map(|item| match item {
        OrderBy::Field { order, .. } => Some(*order),
        OrderBy::Random => None,
    });
    for ((x, y), direction) in a.iter().zip(b).zip(directions) {
        let ordering = match direction {
            SortOrder::Asc => order_values(x, y),
            SortOrder::Desc => order_values(y, x),
        };
        if ordering.is_ne() {
            return ordering;
        }
    }
    std::cmp::Ordering::Equal
}

fn order(rows: &mut Vec<JoinedRow>, order_by: &[OrderBy], alias: &str) -> Result<(), EngineError> {
    if order_by.iter().any(|item| matches!(item, OrderBy::Random)) {
        rows.shuffle(&mut rand::rng());
        return Ok(());
    }
    if order_by.is_empty() {
        return Ok(());
    }
    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows.drain(..) {
        keyed.push((sort_keys(&row, order_by, alias)?, row));
    }
    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, order_by));
    rows.extend(keyed.into_iter().map(|(_, row)| row));
    Ok(())
}

fn project(query: &LogicalQuery, row: &JoinedRow, group: Option<&[JoinedRow]>) -> Result<RawRow, EngineError> {
    let alias = query.alias.as_str();
    let mut out = RawRow::new();
    if query.fields.is_empty() {
        for (table_alias, record) in &row.tables {
            if let Some(record) = record {
                for (column, value) in record {
                    out.insert(format!("{}.{}", table_alias, column), value.clone());
                }
            }
        }
        return Ok(out);
    }
    for field in &query.fields {
        let value = match field {
            // No rows at all: grouped columns have nothing to read from
            SelectField::Field { .. } if group.is_some_and(|rows| rows.is_empty()) => Value::Null,
            SelectField::Field { field, .. } => row.value(field, alias)?,
            SelectField::Aggregate { aggregate, .. } => {
                aggregate_value(aggregate, group.unwrap_or(std::slice::from_ref(row)), alias)?
            }
        };
        out.insert(field.key(), value);
    }
    Ok(out)
}

/// Rows of `table` matching `filter`, by position
fn matching(table: &MemoryTable, filter: &QueryFilter) -> Result<Vec<usize>, EngineError> {
    let alias = table.schema.name.as_str();
    let mut positions = Vec::new();
    for (position, record) in table.rows.iter().enumerate() {
        let row = JoinedRow::new(alias, record.clone());
        if EvalContext::row(&row, alias).matches(filter)? {
            positions.push(position);
        }
    }
    Ok(positions)
}

#[async_trait]
impl Engine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn define_table(&self, schema: &TableSchema) -> Result<TableHandle, EngineError> {
        let mut tables = self.write()?;
        let Some(existing) = tables.get_mut(&schema.name) else {
            tables.insert(schema.name.clone(), MemoryTable::new(schema.clone()));
            crate::debug_log!("memory engine: created table {}", schema.name);
            return Ok(TableHandle {
                name: schema.name.clone(),
                created: true,
                added_columns: Vec::new(),
            });
        };

        let mut added_columns = Vec::new();
        for column in &schema.columns {
            if existing.schema.column(&column.name).is_none() {
                existing.schema.columns.push(column.clone());
                for row in &mut existing.rows {
                    row.insert(column.name.clone(), Value::Null);
                }
                added_columns.push(column.name.clone());
            }
        }
        Ok(TableHandle {
            name: schema.name.clone(),
            created: false,
            added_columns,
        })
    }

    /// Without migration there is nothing to attach to, so the table starts empty
    fn attach_table(&self, schema: &TableSchema) -> Result<(), EngineError> {
        let mut tables = self.write()?;
        tables
            .entry(schema.name.clone())
            .or_insert_with(|| MemoryTable::new(schema.clone()));
        Ok(())
    }

    async fn select(&self, query: &LogicalQuery) -> Result<Vec<RawRow>, EngineError> {
        let tables = self.read()?;
        run(&tables, query)
    }

    fn to_sql(&self, query: &LogicalQuery) -> Result<String, EngineError> {
        Ok(SqlGenerator::new(ParamStyle::Inline).select(query))
    }

    async fn insert(&self, table: &str, record: &Record) -> Result<i64, EngineError> {
        let mut tables = self.write()?;
        let target = tables
            .get_mut(table)
            .ok_or_else(|| EngineError::UnknownTable(table.to_string()))?;
        target.check_columns(record)?;

        let id = match record.get("id").and_then(Value::as_i64) {
            Some(id) => id,
            None => target.next_id,
        };
        target.next_id = target.next_id.max(id + 1);

        let mut row: Record = target
            .schema
            .columns
            .iter()
            .map(|column| (column.name.clone(), Value::Null))
            .collect();
        row.extend(record.iter().map(|(k, v)| (k.clone(), v.clone())));
        row.insert("id".to_string(), Value::Integer(id));
        target.rows.push(row);
        Ok(id)
    }

    async fn update(&self, table: &str, filter: &QueryFilter, record: &Record) -> Result<u64, EngineError> {
        let mut tables = self.write()?;
        let filter = {
            let mut filter = filter.clone();
            resolve_subqueries(&tables, &mut filter)?;
            filter
        };
        let target = tables
            .get_mut(table)
            .ok_or_else(|| EngineError::UnknownTable(table.to_string()))?;
        target.check_columns(record)?;

        let positions = matching(target, &filter)?;
        for &position in &positions {
            let row = &mut target.rows[position];
            for (name, value) in record {
                if name != "id" {
                    row.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(positions.len() as u64)
    }

    async fn delete(&self, table: &str, filter: &QueryFilter) -> Result<u64, EngineError> {
        let mut tables = self.write()?;
        let filter = {
            let mut filter = filter.clone();
            resolve_subqueries(&tables, &mut filter)?;
            filter
        };
        let target = tables
            .get_mut(table)
            .ok_or_else(|| EngineError::UnknownTable(table.to_string()))?;

        let positions = matching(target, &filter)?;
        let mut position = 0usize;
        target.rows.retain(|_| {
            let keep = positions.binary_search(&position).is_err();
            position += 1;
            keep
        });
        Ok(positions.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ColumnSchema;
    use crate::query_builder::field::{FieldRef, TableRef};
    use crate::query_builder::join::JoinClause;
    use type_mapping::FieldType;

    fn column(name: &str, field_type: FieldType) -> ColumnSchema {
        ColumnSchema {
            name: name.to_string(),
            field_type,
            required: false,
            options: Default::default(),
        }
    }

    async fn seeded() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine
            .define_table(&TableSchema {
                name: "person".into(),
                columns: vec![column("id", FieldType::Id), column("name", FieldType::String)],
            })
            .await
            .unwrap();
        engine
            .define_table(&TableSchema {
                name: "post".into(),
                columns: vec![
                    column("id", FieldType::Id),
                    column("title", FieldType::String),
                    column("author", FieldType::Reference("person".into())),
                ],
            })
            .await
            .unwrap();
        for name in ["Ada", "Grace", "Linus"] {
            let mut record = Record::new();
            record.insert("name".into(), Value::from(name));
            engine.insert("person", &record).await.unwrap();
        }
        for (title, author) in [("a", 1), ("b", 1), ("c", 2)] {
            let mut record = Record::new();
            record.insert("title".into(), Value::from(title));
            record.insert("author".into(), Value::Integer(author));
            engine.insert("post", &record).await.unwrap();
        }
        engine
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let engine = seeded().await;
        assert_eq!(engine.row_count("person").unwrap(), 3);
        let rows = engine
            .select(&LogicalQuery::new("person").select([SelectField::field("person.id")]))
            .await
            .unwrap();
        let ids: Vec<Value> = rows.into_iter().map(|r| r["person.id"].clone()).collect();
        assert_eq!(ids, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
    }

    #[tokio::test]
    async fn test_left_join_null_extends() {
        let engine = seeded().await;
        let person = TableRef::base("person");
        let posts = TableRef::new("post", "posts_1");
        let query = LogicalQuery::new("person")
            .select([SelectField::field(person.id()), SelectField::field(posts.id())])
            .join(JoinClause::new(
                JoinType::Left,
                "post",
                "posts_1",
                posts.field("author").eq_field(&person.id()),
            ))
            .order_by(person.id().asc())
            .order_by(posts.id().asc());
        let rows = engine.select(&query).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3]["person.id"], Value::Integer(3));
        assert_eq!(rows[3]["posts_1.id"], Value::Null);
    }

    #[tokio::test]
    async fn test_group_by_with_having() {
        let engine = seeded().await;
        let author = FieldRef::scoped("post", "author");
        let query = LogicalQuery {
            group_by: vec![author.clone()],
            having: Some(FieldRef::scoped("post", "id").count().gt(1)),
            ..LogicalQuery::new("post")
        }
        .select([
            SelectField::field(author.clone()),
            SelectField::aggregate(FieldRef::scoped("post", "id").count()).with_alias("n"),
        ]);
        let rows = engine.select(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["post.author"], Value::Integer(1));
        assert_eq!(rows[0]["n"], Value::Integer(2));
    }

    #[tokio::test]
    async fn test_count_over_no_rows_is_zero() {
        let engine = seeded().await;
        let query = LogicalQuery::new("post")
            .select([SelectField::aggregate(crate::query_builder::aggregation::Aggregate::count_all())])
            .filter(QueryFilter::eq("post.title", "missing"));
        let rows = engine.select(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["count(*)"], Value::Integer(0));
    }

    #[tokio::test]
    async fn test_subquery_update_and_delete() {
        let engine = seeded().await;
        let authors = LogicalQuery::new("post")
            .select([SelectField::field("post.author")])
            .filter(QueryFilter::eq("post.title", "c"));
        let mut values = Record::new();
        values.insert("name".into(), Value::from("Grace Hopper"));
        let changed = engine
            .update(
                "person",
                &FieldRef::scoped("person", "id").in_query(authors),
                &values,
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let removed = engine
            .delete("post", &QueryFilter::eq("post.author", 1))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(engine.row_count("post").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_column_is_rejected() {
        let engine = seeded().await;
        let mut record = Record::new();
        record.insert("nope".into(), Value::from(1));
        assert!(matches!(
            engine.insert("person", &record).await,
            Err(EngineError::UnknownColumn { .. })
        ));
        assert!(matches!(
            engine.insert("ghost", &Record::new()).await,
            Err(EngineError::UnknownTable(_))
        ));
    }

    #[tokio::test]
    async fn test_define_table_adds_columns() {
        let engine = seeded().await;
        let handle = engine
            .define_table(&TableSchema {
                name: "person".into(),
                columns: vec![
                    column("id", FieldType::Id),
                    column("name", FieldType::String),
                    column("bio", FieldType::Text),
                ],
            })
            .await
            .unwrap();
        assert!(!handle.created);
        assert_eq!(handle.added_columns, vec!["bio".to_string()]);
        let rows = engine.select(&LogicalQuery::new("person")).await.unwrap();
        assert_eq!(rows[0]["person.bio"], Value::Null);
    }
}
