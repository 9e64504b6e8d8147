//! Raw rows to entity graphs
//!
//! Rows arrive flat, keyed `alias.column`. Roots are deduplicated by id in
//! first-seen order; each joined hop is folded into its parent, so a
//! one-to-many join that fans out into several rows yields one root holding
//! every child once.

use crate::entity::{Entity, Related};
use crate::errors::DalError;
use crate::query_builder::compile::CompiledQuery;
use crate::query_builder::logical::RawRow;
use crate::schema::registry::Registry;
use std::collections::{BTreeMap, HashMap};
use type_mapping::{Record, Value};

/// Row values split by the alias they were read under; unqualified keys land under `None`
type SplitRow = BTreeMap<Option<String>, Record>;

fn split_row(row: &RawRow) -> SplitRow {
    let mut split = SplitRow::new();
    for (key, value) in row {
        let (alias, column) = match key.split_once('.') {
            Some((alias, column)) => (Some(alias.to_string()), column),
            None => (None, key.as_str()),
        };
        split
            .entry(alias)
            .or_default()
            .insert(column.to_string(), value.clone());
    }
    split
}

struct Materializer<'a> {
    compiled: &'a CompiledQuery,
    registry: &'a Registry,
}

impl Materializer<'_> {
    /// Coerce projected values by their descriptors and start the relation slots of `node`
    fn build(
        &self,
        table: &str,
        alias: &str,
        values: &Record,
        node: Option<usize>,
    ) -> Result<Entity, DalError> {
        let def = self.registry.get(table);
        let mut coerced = Record::new();
        for (column, value) in values {
            let value = match def.and_then(|def| def.field(column)) {
                Some(field) => {
                    let value = field.field_type.coerce(value.clone())?;
                    if value.is_null() && field.required {
                        return Err(DalError::integrity(table, column, "required field is NULL"));
                    }
                    value
                }
                None => value.clone(),
            };
            coerced.insert(column.clone(), value);
        }

        let mut entity = Entity::new(table, alias, coerced);
        for (_, child) in self.compiled.children(node) {
            entity
                .relations_mut()
                .insert(child.name.clone(), Related::empty(child.multiplicity));
        }
        Ok(entity)
    }

    fn merge_children(
        &self,
        entity: &mut Entity,
        node: Option<usize>,
        split: &SplitRow,
    ) -> Result<(), DalError> {
        for (index, child) in self.compiled.children(node) {
            let Some(values) = split.get(&Some(child.table.alias.clone())) else {
                continue;
            };
            // NULL id: the LEFT join found nothing for this hop
            let Some(id) = values.get("id").and_then(Value::as_i64) else {
                continue;
            };

            let slot = entity
                .relations_mut()
                .entry(child.name.clone())
                .or_insert_with(|| Related::empty(child.multiplicity));
            let target = match slot {
                Related::One(existing) => {
                    if existing.is_none() {
                        *existing = Some(Box::new(self.build(
                            &child.table.table,
                            &child.table.alias,
                            values,
                            Some(index),
                        )?));
                    }
                    match existing.as_deref_mut() {
                        Some(current) if current.id() == Some(id) => current,
                        _ => continue,
                    }
                }
                Related::Many(list) => {
                    let position = match list.iter().position(|e| e.id() == Some(id)) {
                        Some(position) => position,
                        None => {
                            list.push(self.build(
                                &child.table.table,
                                &child.table.alias,
                                values,
                                Some(index),
                            )?);
                            list.len() - 1
                        }
                    };
                    &mut list[position]
                }
            };
            self.merge_children(target, Some(index), split)?;
        }
        Ok(())
    }
}

/// Turn the rows of a compiled query into entities
pub(crate) fn materialize(
    compiled: &CompiledQuery,
    registry: &Registry,
    rows: &[RawRow],
) -> Result<Vec<Entity>, DalError> {
    let root = &compiled.root;

    if compiled.aggregated {
        // One entity per row; base columns lose their alias prefix
        return Ok(rows
            .iter()
            .map(|row| {
                let prefix = format!("{}.", root.alias);
                let values = row
                    .iter()
                    .map(|(key, value)| {
                        let key = key.strip_prefix(&prefix).unwrap_or(key);
                        (key.to_string(), value.clone())
                    })
                    .collect();
                Entity::new(&root.table, &root.alias, values)
            })
            .collect());
    }

    let materializer = Materializer { compiled, registry };
    let mut roots: Vec<Entity> = Vec::new();
    let mut positions: HashMap<i64, usize> = HashMap::new();

    for row in rows {
        let mut split = split_row(row);
        let mut values = split.remove(&Some(root.alias.clone())).unwrap_or_default();
        let id = values
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| DalError::integrity(&root.table, "id", "row without a primary key"))?;

        let position = match positions.get(&id) {
            Some(&position) => position,
            None => {
                // Keys that belong to no alias (renamed columns) stay on the root
                if let Some(extra) = split.get(&None) {
                    for (key, value) in extra {
                        values.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
                let unknown: Vec<(String, Record)> = split
                    .iter()
                    .filter_map(|(alias, record)| {
                        let alias = alias.as_ref()?;
                        (!compiled.aliases.contains_key(alias)).then(|| (alias.clone(), record.clone()))
                    })
                    .collect();
                for (alias, record) in unknown {
                    for (column, value) in record {
                        values.insert(format!("{}.{}", alias, column), value);
                    }
                }
                roots.push(materializer.build(&root.table, &root.alias, &values, None)?);
                positions.insert(id, roots.len() - 1);
                roots.len() - 1
            }
        };
        materializer.merge_children(&mut roots[position], None, &split)?;
    }

    crate::trace_log!("materialized {} {} rows from {} raw rows", roots.len(), root.table, rows.len());
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_builder::builder::{JoinRequest, QueryState};
    use crate::query_builder::compile::Compiler;
    use crate::schema::entity::EntityBuilder;
    use crate::schema::field::FieldDescriptor;
    use crate::schema::relationship::Relationship;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .define(
                EntityBuilder::new("person")
                    .field(FieldDescriptor::string("name").required())
                    .relationship("posts", Relationship::many_by("post", "author"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .define(
                EntityBuilder::new("post")
                    .field(FieldDescriptor::string("title"))
                    .field(FieldDescriptor::reference("author", "person"))
                    .field(FieldDescriptor::date("published"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry.finalize().unwrap();
        registry
    }

    fn compile(registry: &Registry, joins: &[&str]) -> CompiledQuery {
        let mut state = QueryState::default();
        if !joins.is_empty() {
            state.joins.push(JoinRequest {
                paths: Some(joins.iter().map(|j| j.to_string()).collect()),
                method: None,
                condition_and: None,
                adhoc: None,
            });
        }
        Compiler::new(registry, registry.entity("person").unwrap())
            .compile(&state)
            .unwrap()
    }

    fn row(pairs: &[(&str, Value)]) -> RawRow {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_fan_out_folds_into_one_root() {
        let registry = registry();
        let compiled = compile(&registry, &["posts"]);
        let alias = compiled.nodes[0].table.alias.clone();
        let rows: Vec<RawRow> = (1..=3)
            .map(|post| {
                row(&[
                    ("person.id", Value::Integer(1)),
                    ("person.name", Value::from("Ada")),
                    (format!("{}.id", alias).as_str(), Value::Integer(post)),
                    (format!("{}.title", alias).as_str(), Value::from(format!("post {}", post))),
                    (format!("{}.published", alias).as_str(), Value::from(format!("2024-01-0{}", post))),
                ])
            })
            .collect();

        let people = materialize(&compiled, &registry, &rows).unwrap();
        assert_eq!(people.len(), 1);
        let posts = people[0].many("posts");
        assert_eq!(
            posts.iter().map(|p| p.id().unwrap()).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(matches!(posts[0].value("published"), Some(Value::Date(_))));
    }

    #[test]
    fn test_null_left_join_gives_no_child() {
        let registry = registry();
        let compiled = compile(&registry, &["posts"]);
        let alias = compiled.nodes[0].table.alias.clone();
        let rows = vec![row(&[
            ("person.id", Value::Integer(1)),
            ("person.name", Value::from("Ada")),
            (format!("{}.id", alias).as_str(), Value::Null),
            (format!("{}.title", alias).as_str(), Value::Null),
        ])];

        let people = materialize(&compiled, &registry, &rows).unwrap();
        assert!(people[0].many("posts").is_empty());
        assert!(people[0].joined("posts").is_some());
    }

    #[test]
    fn test_required_null_is_an_integrity_error() {
        let registry = registry();
        let compiled = compile(&registry, &[]);
        let rows = vec![row(&[
            ("person.id", Value::Integer(1)),
            ("person.name", Value::Null),
        ])];

        assert!(matches!(
            materialize(&compiled, &registry, &rows),
            Err(DalError::Integrity { .. })
        ));
    }

    #[test]
    fn test_unprojected_columns_are_absent() {
        let registry = registry();
        let compiled = compile(&registry, &[]);
        let rows = vec![
            row(&[("person.id", Value::Integer(2)), ("renamed", Value::Integer(5))]),
            row(&[("person.id", Value::Integer(1))]),
            row(&[("person.id", Value::Integer(2))]),
        ];

        let people = materialize(&compiled, &registry, &rows).unwrap();
        assert_eq!(people.iter().map(|p| p.id().unwrap()).collect::<Vec<_>>(), vec![2, 1]);
        assert!(people[0].value("name").is_none());
        assert_eq!(people[0].value("renamed"), Some(&Value::Integer(5)));
    }
}
