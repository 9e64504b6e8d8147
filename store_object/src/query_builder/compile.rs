//! Compilation of builder state into one logical query
//!
//! Joins are expanded first so every relationship path has its alias before
//! any field reference is resolved. That lets a `where_` name a path that is
//! only joined later in the chain.

use crate::errors::DalError;
use crate::query_builder::aggregation::SelectField;
use crate::query_builder::builder::{QueryState, WherePart};
use crate::query_builder::field::{FieldRef, TableRef};
use crate::query_builder::filter::{Operand, QueryCondition, QueryFilter, QueryOperator};
use crate::query_builder::join::{JoinClause, JoinType};
use crate::query_builder::logical::LogicalQuery;
use crate::query_builder::ordering::OrderBy;
use crate::schema::entity::EntityDef;
use crate::schema::registry::Registry;
use crate::schema::relationship::{JoinSpec, Multiplicity, OnScope, Relationship};
use crate::validation::validate_name;
use cache_system::{digest, CacheError, Expiry};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use type_mapping::FieldType;

/// Query-wide alias allocation: `{relation}_{n}` with one counter per query
#[derive(Debug, Default, Clone)]
pub struct AliasCounter {
    next: usize,
}

impl AliasCounter {
    pub fn next(&mut self, relation: &str) -> String {
        self.next += 1;
        format!("{}_{}", relation, self.next)
    }
}

/// One joined relationship hop
#[derive(Debug, Clone, PartialEq)]
pub struct JoinNode {
    /// Relationship name
    pub name: String,
    /// Dotted path from the base entity, e.g. `author.roles`
    pub path: String,
    /// The relationship target as joined in this query
    pub table: TableRef,
    pub multiplicity: Multiplicity,
    /// Index of the hop this one hangs off; `None` for hops off the base table
    pub parent: Option<usize>,
}

/// A key column a cached query depends on, and the table its values point at
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyField {
    pub field: FieldRef,
    pub table: String,
}

/// Dependency restriction and expiry for a cached query
#[derive(Debug, Clone, PartialEq)]
pub struct CachePlan {
    /// `None` tracks every primary key reachable through the join tree
    pub dependency_fields: Option<Vec<DependencyField>>,
    pub expiry: Option<Expiry>,
}

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    /// The query handed to the engine
    pub query: LogicalQuery,
    pub entity: Arc<EntityDef>,
    pub root: TableRef,
    pub nodes: Vec<JoinNode>,
    /// Every alias of the query and the table it reads
    pub aliases: BTreeMap<String, String>,
    /// WHERE clause before the root id restriction used for limits
    pub where_filter: Option<QueryFilter>,
    pub cache: Option<CachePlan>,
    pub aggregated: bool,
}

impl CompiledQuery {
    pub fn paths(&self) -> Vec<String> {
        self.nodes.iter().map(|node| node.path.clone()).collect()
    }

    /// Hops hanging directly off `parent` (`None` for the base table), in join order
    pub fn children(&self, parent: Option<usize>) -> impl Iterator<Item = (usize, &JoinNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, node)| node.parent == parent)
    }

    /// Root ids of the rows the query selects, honouring its limits
    pub fn id_query(&self) -> LogicalQuery {
        // With joins the limits already sit in a root id subquery of the filter
        let joined = !self.query.joins.is_empty();
        LogicalQuery {
            fields: vec![SelectField::field(self.root.id())],
            joins: self.query.joins.clone(),
            filter: self.query.filter.clone(),
            distinct: joined,
            order_by: if joined { Vec::new() } else { self.query.order_by.clone() },
            limit: self.query.limit,
            offset: self.query.offset,
            ..LogicalQuery::new(&self.root.table)
        }
    }

    /// Every primary key reachable through the joins, for caching aggregated results
    pub fn dependency_query(&self) -> LogicalQuery {
        LogicalQuery {
            fields: self
                .aliases
                .keys()
                .map(|alias| SelectField::field(FieldRef::scoped(alias, "id")))
                .collect(),
            joins: self.query.joins.clone(),
            filter: self.where_filter.clone(),
            distinct: true,
            ..LogicalQuery::new(&self.root.table)
        }
    }

    /// COUNT(DISTINCT root.id) over the same filters and joins
    pub fn count_query(&self) -> LogicalQuery {
        LogicalQuery {
            fields: vec![SelectField::aggregate(self.root.id().count_distinct()).with_alias("count")],
            joins: self.query.joins.clone(),
            filter: self.where_filter.clone(),
            ..LogicalQuery::new(&self.root.table)
        }
    }

    /// Digest of the query, its join tree and the dependency restriction
    pub fn cache_key(&self) -> Result<String, CacheError> {
        let dependency_fields = self
            .cache
            .as_ref()
            .and_then(|plan| plan.dependency_fields.as_ref());
        digest(&(&self.query, self.paths(), dependency_fields))
    }
}

/// Extra condition and method for the joins one request creates
struct PendingJoin<'a> {
    method: Option<JoinType>,
    condition_and: Option<&'a QueryFilter>,
}

pub(crate) struct Compiler<'a> {
    registry: &'a Registry,
    entity: Arc<EntityDef>,
    root: TableRef,
    counter: AliasCounter,
    nodes: Vec<JoinNode>,
    clauses: Vec<JoinClause>,
    aliases: BTreeMap<String, String>,
    paths: BTreeMap<String, usize>,
    /// Aliases of junction tables laid out by `on` relationships
    junctions: Vec<TableRef>,
    /// Conditions to AND into a join clause once every alias is known
    extra_conditions: Vec<(usize, QueryFilter)>,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(registry: &'a Registry, entity: Arc<EntityDef>) -> Self {
        let root = entity.table_ref();
        let mut aliases = BTreeMap::new();
        aliases.insert(root.alias.clone(), root.table.clone());
        Self {
            registry,
            entity,
            root,
            counter: AliasCounter::default(),
            nodes: Vec::new(),
            clauses: Vec::new(),
            aliases,
            paths: BTreeMap::new(),
            junctions: Vec::new(),
            extra_conditions: Vec::new(),
        }
    }

    pub(crate) fn compile(mut self, state: &QueryState) -> Result<CompiledQuery, DalError> {
        if !self.registry.is_finalized() {
            return Err(DalError::Configuration(
                "the schema must be finalized before queries run".to_string(),
            ));
        }

        // Joins
        for request in &state.joins {
            let pending = PendingJoin {
                method: request.method.or(state.join_method),
                condition_and: request.condition_and.as_ref(),
            };
            match &request.paths {
                Some(paths) => match &request.adhoc {
                    Some(relationship) => {
                        for path in paths {
                            self.join_adhoc(path, relationship, &pending)?;
                        }
                    }
                    None => {
                        for path in paths {
                            self.join_path(path, &pending, None)?;
                        }
                    }
                },
                None => {
                    let names: Vec<String> = self
                        .entity
                        .relationships()
                        .iter()
                        .filter(|(_, relationship)| !relationship.explicit)
                        .map(|(name, _)| name.clone())
                        .collect();
                    for name in names {
                        self.join_path(&name, &pending, None)?;
                    }
                }
            }
        }
        for (index, mut condition) in std::mem::take(&mut self.extra_conditions) {
            self.resolve_filter(&mut condition)?;
            let clause = &mut self.clauses[index];
            clause.condition = Some(match clause.condition.take() {
                Some(existing) => existing & condition,
                None => condition,
            });
        }

        // WHERE: AND of groups, OR within a group
        let mut groups = Vec::with_capacity(state.wheres.len());
        for parts in &state.wheres {
            let mut alternatives = Vec::with_capacity(parts.len());
            for part in parts {
                let mut filter = match part {
                    WherePart::Filter(filter) => filter.clone(),
                    WherePart::Equalities(pairs) => QueryFilter::and(
                        pairs
                            .iter()
                            .map(|(field, value)| field.eq(value.clone()))
                            .collect(),
                    ),
                    WherePart::Present(field) => field.is_not_null(),
                    WherePart::Deferred(build) => build(&self.root),
                };
                self.resolve_filter(&mut filter)?;
                alternatives.push(filter);
            }
            if !alternatives.is_empty() {
                groups.push(QueryFilter::or(alternatives));
            }
        }
        let where_filter = if groups.is_empty() {
            None
        } else {
            Some(QueryFilter::and(groups))
        };

        // GROUP BY / HAVING
        let mut group_by = state.group_by.clone();
        for field in &mut group_by {
            self.resolve_field(field)?;
        }
        let having = if state.having.is_empty() {
            None
        } else {
            let mut having = QueryFilter::and(state.having.clone());
            self.resolve_filter(&mut having)?;
            Some(having)
        };

        // ORDER BY
        let mut order_by = state.order_by.clone();
        if order_by.len() > 1 && order_by.iter().any(|item| matches!(item, OrderBy::Random)) {
            return Err(DalError::Query(
                "random ordering cannot be combined with other order items".to_string(),
            ));
        }
        for item in &mut order_by {
            if let OrderBy::Field { field, .. } = item {
                self.resolve_field(field)?;
            }
        }

        // Projection
        let mut fields = state.select.clone();
        for field in &mut fields {
            if let Some(field) = field.field_mut() {
                self.resolve_field(field)?;
            }
        }
        let aggregated = !group_by.is_empty() || fields.iter().any(SelectField::is_aggregate);

        // Cache dependencies
        let cache = match &state.cache {
            Some(request) => {
                let dependency_fields = match request.depends_on.as_slice() {
                    [] => None,
                    depends_on => {
                        let mut resolved = Vec::with_capacity(depends_on.len());
                        for field in depends_on {
                            let mut field = field.clone();
                            self.resolve_field(&mut field)?;
                            let table = match self.field_type(&field) {
                                Some(FieldType::Id) => field
                                    .scope
                                    .as_ref()
                                    .and_then(|alias| self.aliases.get(alias))
                                    .cloned(),
                                Some(FieldType::Reference(target)) => Some(target),
                                _ => None,
                            };
                            match table {
                                Some(table) => resolved.push(DependencyField { field, table }),
                                None => {
                                    return Err(DalError::Query(format!(
                                        "cache dependency '{}' must be a primary key or a reference",
                                        field
                                    )))
                                }
                            }
                        }
                        Some(resolved)
                    }
                };
                Some(CachePlan {
                    dependency_fields,
                    expiry: request.expiry()?,
                })
            }
            None => None,
        };

        if !aggregated {
            self.complete_projection(&mut fields, cache.as_ref());
        }

        // Limits apply to root ids when joins can multiply rows
        let mut filter = where_filter.clone();
        let (mut limit, mut offset) = (state.limit, state.offset);
        let limited = limit.is_some() || offset.is_some_and(|offset| offset > 0);
        if limited && !aggregated && !self.clauses.is_empty() {
            let root_order: Vec<OrderBy> = order_by
                .iter()
                .filter(|item| match item.field() {
                    Some(field) => field.scope.as_deref() == Some(self.root.alias.as_str()),
                    None => true,
                })
                .cloned()
                .collect();
            let ids = LogicalQuery {
                fields: vec![SelectField::field(self.root.id())],
                joins: self.clauses.clone(),
                filter: where_filter.clone(),
                group_by: vec![self.root.id()],
                order_by: root_order,
                limit: limit.take(),
                offset: offset.take(),
                ..LogicalQuery::new(&self.root.table)
            };
            let restriction = self.root.id().in_query(ids);
            filter = Some(match filter {
                Some(existing) => existing & restriction,
                None => restriction,
            });
        }

        let query = LogicalQuery {
            table: self.root.table.clone(),
            alias: self.root.alias.clone(),
            fields,
            joins: self.clauses,
            filter,
            group_by,
            having,
            order_by,
            limit,
            offset,
            distinct: state.distinct,
        };
        crate::trace_log!("compiled query on {}: {:?}", self.root.table, query);

        Ok(CompiledQuery {
            query,
            entity: self.entity,
            root: self.root,
            nodes: self.nodes,
            aliases: self.aliases,
            where_filter,
            cache,
            aggregated,
        })
    }

    /// Join an undeclared relationship off the base table under `name`
    fn join_adhoc(
        &mut self,
        name: &str,
        relationship: &Relationship,
        pending: &PendingJoin<'_>,
    ) -> Result<(), DalError> {
        validate_name(name)?;
        if self.paths.contains_key(name) {
            return Err(DalError::Configuration(format!(
                "{}: '{}' is already joined",
                self.entity.name(),
                name
            )));
        }
        self.join_path(name, pending, Some(relationship))
    }

    /// Join each hop of a dotted relationship path, reusing hops already joined.
    /// `adhoc` stands in for the declared relationship of a single-hop path.
    fn join_path(
        &mut self,
        path: &str,
        pending: &PendingJoin<'_>,
        adhoc: Option<&Relationship>,
    ) -> Result<(), DalError> {
        let mut parent: Option<usize> = None;
        let mut source = self.root.clone();
        let mut entity = self.entity.clone();
        let mut prefix = String::new();
        let mut last_clause = None;

        for hop in path.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(hop);

            if let Some(&index) = self.paths.get(&prefix) {
                let node = &self.nodes[index];
                source = node.table.clone();
                entity = self.registry.entity(&node.table.table)?;
                parent = Some(index);
                continue;
            }

            let relationship = match adhoc {
                Some(relationship) => relationship.clone(),
                None => entity.relationship(hop).cloned().ok_or_else(|| {
                    DalError::UnknownRelationship {
                        entity: entity.name().to_string(),
                        relationship: hop.to_string(),
                    }
                })?,
            };
            let method = pending.method.unwrap_or(relationship.join);

            let target = match &relationship.spec {
                JoinSpec::Condition(condition) => {
                    let alias = self.counter.next(hop);
                    let target = TableRef::new(&relationship.target, &alias);
                    let condition = condition(&source, &target);
                    self.add_cross_joins(hop, &source, &target, &condition)?;
                    self.aliases.insert(target.alias.clone(), target.table.clone());
                    self.clauses.push(JoinClause::new(
                        method,
                        &target.table,
                        &target.alias,
                        condition,
                    ));
                    target
                }
                JoinSpec::On(on) => {
                    let mut scope =
                        OnScope::new(hop, source.clone(), &relationship.target, &mut self.counter);
                    let steps = on(&mut scope);
                    let target = match scope.into_target() {
                        Some(target) => target,
                        None => steps
                            .iter()
                            .rev()
                            .find(|step| step.table.table == relationship.target)
                            .map(|step| step.table.clone())
                            .ok_or_else(|| {
                                DalError::Configuration(format!(
                                    "{}.{}: join steps never reach '{}'",
                                    entity.name(),
                                    hop,
                                    relationship.target
                                ))
                            })?,
                    };
                    for step in steps {
                        self.aliases.insert(step.table.alias.clone(), step.table.table.clone());
                        if step.table != target {
                            self.junctions.push(step.table.clone());
                        }
                        let step_method = pending.method.or(step.method).unwrap_or(relationship.join);
                        self.clauses.push(JoinClause::new(
                            step_method,
                            &step.table.table,
                            &step.table.alias,
                            step.condition,
                        ));
                    }
                    target
                }
            };

            crate::debug_log!("joined {} as {}", prefix, target.alias);
            last_clause = Some(self.clauses.len() - 1);
            self.nodes.push(JoinNode {
                name: hop.to_string(),
                path: prefix.clone(),
                table: target.clone(),
                multiplicity: relationship.multiplicity,
                parent,
            });
            let index = self.nodes.len() - 1;
            self.paths.insert(prefix.clone(), index);
            parent = Some(index);
            entity = self.registry.entity(&target.table)?;
            source = target;
        }

        if let (Some(index), Some(condition)) = (last_clause, pending.condition_and) {
            self.extra_conditions.push((index, condition.clone()));
        }
        Ok(())
    }

    /// A condition that does not link exactly source and target degenerates into a cross join
    fn add_cross_joins(
        &mut self,
        relation: &str,
        source: &TableRef,
        target: &TableRef,
        condition: &QueryFilter,
    ) -> Result<(), DalError> {
        let scopes: BTreeSet<&str> = condition
            .fields()
            .into_iter()
            .filter_map(|field| field.scope.as_deref())
            .collect();
        let links_both = scopes.contains(source.alias.as_str()) && scopes.contains(target.alias.as_str());
        let others: Vec<&str> = scopes
            .iter()
            .copied()
            .filter(|scope| *scope != source.alias && *scope != target.alias)
            .collect();
        if links_both && others.is_empty() {
            return Ok(());
        }

        tracing::warn!(
            relationship = %relation,
            "join condition does not link {} and {} alone; the extra tables are cross joined",
            source.alias,
            target.alias
        );
        for scope in others {
            if self.aliases.contains_key(scope) {
                continue;
            }
            if self.registry.get(scope).is_none() {
                return Err(DalError::Query(format!(
                    "join condition of '{}' names unknown table '{}'",
                    relation, scope
                )));
            }
            self.aliases.insert(scope.to_string(), scope.to_string());
            self.clauses.push(JoinClause::cross(scope, scope));
        }
        Ok(())
    }

    fn field_type(&self, field: &FieldRef) -> Option<FieldType> {
        let table = self.aliases.get(field.scope.as_deref()?)?;
        let entity = self.registry.get(table)?;
        entity.field(&field.name).map(|f| f.field_type.clone())
    }

    /// Scope a field to a concrete alias: an alias of this query first, then a relationship path
    fn resolve_field(&self, field: &mut FieldRef) -> Result<(), DalError> {
        let alias = match field.scope.as_deref() {
            None => self.root.alias.clone(),
            Some(scope) if self.aliases.contains_key(scope) => scope.to_string(),
            Some(scope) => match self.paths.get(scope) {
                Some(&index) => self.nodes[index].table.alias.clone(),
                None => {
                    return Err(DalError::Query(format!(
                        "'{}' is neither a table of this query nor a joined relationship",
                        scope
                    )))
                }
            },
        };
        if let Some(entity) = self.aliases.get(&alias).and_then(|table| self.registry.get(table)) {
            if !entity.has_field(&field.name) {
                return Err(DalError::unknown_field(entity.name(), &field.name));
            }
        }
        field.scope = Some(alias);
        Ok(())
    }

    fn resolve_filter(&self, filter: &mut QueryFilter) -> Result<(), DalError> {
        filter.try_map_fields(&mut |field| self.resolve_field(field))?;
        self.coerce_filter(filter)
    }

    /// Convert compared values to the compared column's type
    fn coerce_filter(&self, filter: &mut QueryFilter) -> Result<(), DalError> {
        match filter {
            QueryFilter::Condition(condition) => self.coerce_condition(condition),
            QueryFilter::Group { filters, .. } => filters
                .iter_mut()
                .try_for_each(|filter| self.coerce_filter(filter)),
            QueryFilter::Not(inner) => self.coerce_filter(inner),
            QueryFilter::Always(_) => Ok(()),
        }
    }

    fn coerce_condition(&self, condition: &mut QueryCondition) -> Result<(), DalError> {
        let Operand::Field(field) = &condition.left else {
            return Ok(());
        };
        let Some(field_type) = self.field_type(field) else {
            return Ok(());
        };
        let target = match condition.operator {
            QueryOperator::Like
            | QueryOperator::ILike
            | QueryOperator::IsNull
            | QueryOperator::IsNotNull => return Ok(()),
            QueryOperator::Contains | QueryOperator::ArrayOverlap => element_type(&field_type),
            _ => field_type,
        };
        match &mut condition.right {
            Some(Operand::Value(value)) => *value = target.coerce(std::mem::take(value))?,
            Some(Operand::List(values)) => {
                for value in values.iter_mut() {
                    *value = target.coerce(std::mem::take(value))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Add the columns materialization needs to a row query's projection
    fn complete_projection(&self, fields: &mut Vec<SelectField>, cache: Option<&CachePlan>) {
        let push_missing = |fields: &mut Vec<SelectField>, field: FieldRef| {
            if !fields.iter().any(|selected| selected.as_field() == Some(&field)) {
                fields.push(SelectField::field(field));
            }
        };

        if fields.is_empty() {
            for name in self.entity.field_names() {
                fields.push(SelectField::field(self.root.field(name)));
            }
            for node in &self.nodes {
                if let Some(entity) = self.registry.get(&node.table.table) {
                    for name in entity.field_names() {
                        fields.push(SelectField::field(node.table.field(name)));
                    }
                }
            }
        } else {
            if !fields.iter().any(|f| f.as_field() == Some(&self.root.id())) {
                fields.insert(0, SelectField::field(self.root.id()));
            }
            for node in &self.nodes {
                let selected = fields.iter().any(|f| {
                    f.as_field().and_then(|field| field.scope.as_deref()) == Some(node.table.alias.as_str())
                });
                if selected {
                    push_missing(fields, node.table.id());
                } else if let Some(entity) = self.registry.get(&node.table.table) {
                    for name in entity.field_names() {
                        push_missing(fields, node.table.field(name));
                    }
                }
            }
        }

        for junction in &self.junctions {
            push_missing(fields, junction.id());
        }
        if let Some(dependency_fields) = cache.and_then(|plan| plan.dependency_fields.as_ref()) {
            for dependency in dependency_fields {
                push_missing(fields, dependency.field.clone());
            }
        }
    }
}

fn element_type(field_type: &FieldType) -> FieldType {
    match field_type {
        FieldType::ListOfString => FieldType::String,
        FieldType::ListOfInteger => FieldType::BigInteger,
        FieldType::ListOfReference(table) => FieldType::Reference(table.clone()),
        other => other.clone(),
    }
}
