//! Fluent query builder
//!
//! Builder methods only record state; nothing is resolved until a terminal
//! compiles it. Every method consumes and returns the builder, and the builder
//! is `Clone`, so a partially built query can be branched.

use crate::dal::Dal;
use crate::query_builder::aggregation::SelectField;
use crate::query_builder::field::{FieldRef, TableRef};
use crate::query_builder::filter::QueryFilter;
use crate::query_builder::join::JoinType;
use crate::query_builder::ordering::OrderBy;
use crate::schema::entity::EntityDef;
use crate::schema::relationship::Relationship;
use cache_system::{CacheError, Expiry};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use type_mapping::{Record, Value};

pub type DeferredFilter = Arc<dyn Fn(&TableRef) -> QueryFilter + Send + Sync>;

/// One alternative of a `where_` call
#[derive(Clone)]
pub enum WherePart {
    Filter(QueryFilter),
    /// Keyword equalities, ANDed
    Equalities(Vec<(FieldRef, Value)>),
    /// A bare field: IS NOT NULL
    Present(FieldRef),
    /// Built from the base table once the query compiles
    Deferred(DeferredFilter),
}

impl fmt::Debug for WherePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WherePart::Filter(filter) => f.debug_tuple("Filter").field(filter).finish(),
            WherePart::Equalities(pairs) => f.debug_tuple("Equalities").field(pairs).finish(),
            WherePart::Present(field) => f.debug_tuple("Present").field(field).finish(),
            WherePart::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

impl From<QueryFilter> for WherePart {
    fn from(filter: QueryFilter) -> Self {
        WherePart::Filter(filter)
    }
}

impl From<FieldRef> for WherePart {
    fn from(field: FieldRef) -> Self {
        WherePart::Present(field)
    }
}

impl From<&str> for WherePart {
    fn from(path: &str) -> Self {
        WherePart::Present(FieldRef::parse(path))
    }
}

impl From<Record> for WherePart {
    fn from(record: Record) -> Self {
        WherePart::Equalities(
            record
                .into_iter()
                .map(|(name, value)| (FieldRef::parse(&name), value))
                .collect(),
        )
    }
}

impl<K: Into<FieldRef>, V: Into<Value>> From<Vec<(K, V)>> for WherePart {
    fn from(pairs: Vec<(K, V)>) -> Self {
        WherePart::Equalities(
            pairs
                .into_iter()
                .map(|(field, value)| (field.into(), value.into()))
                .collect(),
        )
    }
}

impl<K: Into<FieldRef>, V: Into<Value>, const N: usize> From<[(K, V); N]> for WherePart {
    fn from(pairs: [(K, V); N]) -> Self {
        WherePart::from(Vec::from(pairs))
    }
}

/// Options of `select_with`
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub orderby: Vec<OrderBy>,
    pub groupby: Vec<FieldRef>,
    /// `(limit, offset)`
    pub limitby: Option<(u64, u64)>,
    pub distinct: bool,
    pub having: Option<QueryFilter>,
    /// Method for joins that do not name their own
    pub join_method: Option<JoinType>,
    pub cache: Option<CacheOptions>,
}

/// Options of `join_with`
#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    /// Overrides the declared method, in either direction
    pub method: Option<JoinType>,
    /// ANDed into the join condition of the last hop
    pub condition_and: Option<QueryFilter>,
}

impl JoinOptions {
    pub fn method(method: JoinType) -> Self {
        Self {
            method: Some(method),
            condition_and: None,
        }
    }

    pub fn condition_and(mut self, condition: QueryFilter) -> Self {
        self.condition_and = Some(condition);
        self
    }
}

/// Options of `cache_with`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheOptions {
    /// Empty tracks every primary key reachable through the joins
    pub depends_on: Vec<FieldRef>,
    pub ttl: Option<Duration>,
    pub expires_at: Option<DateTime<Utc>>,
    pub seconds: Option<u64>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depends_on<F: Into<FieldRef>>(mut self, fields: impl IntoIterator<Item = F>) -> Self {
        self.depends_on.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn seconds(mut self, seconds: u64) -> Self {
        self.seconds = Some(seconds);
        self
    }

    /// The expiry named by these options; `None` means the session default
    pub fn expiry(&self) -> Result<Option<Expiry>, CacheError> {
        let ttl = match (self.ttl, self.seconds) {
            (Some(_), Some(_)) => {
                return Err(CacheError::InvalidExpiry(
                    "pass either a ttl or a number of seconds, not both".to_string(),
                ))
            }
            (ttl, seconds) => ttl.or(seconds.map(Duration::from_secs)),
        };
        if ttl.is_none() && self.expires_at.is_none() {
            return Ok(None);
        }
        Expiry::from_parts(ttl, self.expires_at).map(Some)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct JoinRequest {
    /// `None` joins every relationship not marked explicit
    pub(crate) paths: Option<Vec<String>>,
    pub(crate) method: Option<JoinType>,
    pub(crate) condition_and: Option<QueryFilter>,
    /// Relationship to use for the single path instead of a declared one
    pub(crate) adhoc: Option<Relationship>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct QueryState {
    /// AND of groups, OR within a group
    pub(crate) wheres: Vec<Vec<WherePart>>,
    pub(crate) select: Vec<SelectField>,
    pub(crate) distinct: bool,
    pub(crate) joins: Vec<JoinRequest>,
    pub(crate) join_method: Option<JoinType>,
    pub(crate) group_by: Vec<FieldRef>,
    pub(crate) having: Vec<QueryFilter>,
    pub(crate) order_by: Vec<OrderBy>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) cache: Option<CacheOptions>,
}

#[derive(Clone)]
pub struct QueryBuilder {
    pub(crate) dal: Arc<Dal>,
    pub(crate) entity: Arc<EntityDef>,
    pub(crate) state: QueryState,
}

impl fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("entity", &self.entity.name())
            .field("state", &self.state)
            .finish()
    }
}

impl QueryBuilder {
    pub(crate) fn new(dal: Arc<Dal>, entity: Arc<EntityDef>) -> Self {
        Self {
            dal,
            entity,
            state: QueryState::default(),
        }
    }

    pub fn entity(&self) -> &EntityDef {
        &self.entity
    }

    /// AND one predicate into the query
    pub fn where_(mut self, part: impl Into<WherePart>) -> Self {
        self.state.wheres.push(vec![part.into()]);
        self
    }

    /// AND the OR of `parts` into the query
    pub fn where_any<P: Into<WherePart>>(mut self, parts: impl IntoIterator<Item = P>) -> Self {
        self.state
            .wheres
            .push(parts.into_iter().map(Into::into).collect());
        self
    }

    pub fn where_eq(self, field: impl Into<FieldRef>, value: impl Into<Value>) -> Self {
        self.where_(WherePart::Equalities(vec![(field.into(), value.into())]))
    }

    /// Predicate built from the base table when the query compiles
    pub fn where_fn<F>(self, build: F) -> Self
    where
        F: Fn(&TableRef) -> QueryFilter + Send + Sync + 'static,
    {
        self.where_(WherePart::Deferred(Arc::new(build)))
    }

    pub fn select<S: Into<SelectField>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.state.select.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn select_with<S: Into<SelectField>>(
        self,
        fields: impl IntoIterator<Item = S>,
        options: SelectOptions,
    ) -> Self {
        let mut builder = self.select(fields).orderby(options.orderby).groupby(options.groupby);
        if let Some((limit, offset)) = options.limitby {
            builder = builder.limitby(limit, offset);
        }
        if options.distinct {
            builder = builder.distinct();
        }
        if let Some(having) = options.having {
            builder = builder.having(having);
        }
        if let Some(method) = options.join_method {
            builder.state.join_method = Some(method);
        }
        if let Some(cache) = options.cache {
            builder = builder.cache_with(cache);
        }
        builder
    }

    pub fn distinct(mut self) -> Self {
        self.state.distinct = true;
        self
    }

    /// Join relationships by name or dotted path; no names joins every non-explicit relationship
    pub fn join<S: AsRef<str>>(self, names: impl IntoIterator<Item = S>) -> Self {
        self.join_with(names, JoinOptions::default())
    }

    pub fn join_with<S: AsRef<str>>(
        mut self,
        names: impl IntoIterator<Item = S>,
        options: JoinOptions,
    ) -> Self {
        let names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        self.state.joins.push(JoinRequest {
            paths: if names.is_empty() { None } else { Some(names) },
            method: options.method,
            condition_and: options.condition_and,
            adhoc: None,
        });
        self
    }

    /// Join a relationship that is not declared on the entity. The joined rows
    /// are stored under the target table's name.
    ///
    /// ```rust,ignore
    /// let rows = dal
    ///     .query("person")?
    ///     .join_relationship(Relationship::many("post", |person, post| {
    ///         post.field("author").eq_field(&person.field("id"))
    ///     }))
    ///     .collect()
    ///     .await?;
    /// ```
    pub fn join_relationship(self, relationship: Relationship) -> Self {
        let name = relationship.target.clone();
        self.join_relationship_with(&name, relationship, JoinOptions::default())
    }

    /// Join an undeclared relationship under `name`
    pub fn join_relationship_with(
        mut self,
        name: &str,
        relationship: Relationship,
        options: JoinOptions,
    ) -> Self {
        self.state.joins.push(JoinRequest {
            paths: Some(vec![name.to_string()]),
            method: options.method,
            condition_and: options.condition_and,
            adhoc: Some(relationship),
        });
        self
    }

    pub fn join_all(self) -> Self {
        self.join(Vec::<String>::new())
    }

    pub fn groupby<F: Into<FieldRef>>(mut self, fields: impl IntoIterator<Item = F>) -> Self {
        self.state.group_by.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn having(mut self, filter: QueryFilter) -> Self {
        self.state.having.push(filter);
        self
    }

    pub fn orderby<O: Into<OrderBy>>(mut self, items: impl IntoIterator<Item = O>) -> Self {
        self.state.order_by.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn limitby(mut self, limit: u64, offset: u64) -> Self {
        self.state.limit = Some(limit);
        self.state.offset = Some(offset);
        self
    }

    /// Cache results. No fields tracks every row reached through the joins.
    pub fn cache<F: Into<FieldRef>>(self, fields: impl IntoIterator<Item = F>) -> Self {
        self.cache_with(CacheOptions::new().depends_on(fields))
    }

    pub fn cache_with(mut self, options: CacheOptions) -> Self {
        self.state.cache = Some(options);
        self
    }
}
