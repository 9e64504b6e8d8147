//! Reusable schema fragments
//!
//! A fragment is a bundle of fields and record hooks that an `EntityBuilder`
//! merges in with `fragment(...)`.

use crate::schema::entity::RecordHook;
use crate::schema::field::FieldDescriptor;
use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use type_mapping::{Record, Value};

#[derive(Clone, Default)]
pub struct SchemaFragment {
    pub(crate) fields: Vec<FieldDescriptor>,
    pub(crate) before_insert: Vec<RecordHook>,
    pub(crate) before_update: Vec<RecordHook>,
}

impl SchemaFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn before_insert<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Record) + Send + Sync + 'static,
    {
        self.before_insert.push(Arc::new(hook));
        self
    }

    pub fn before_update<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Record) + Send + Sync + 'static,
    {
        self.before_update.push(Arc::new(hook));
        self
    }
}

fn now() -> Value {
    Value::Timestamp(Utc::now().naive_utc())
}

/// `created_at` and `updated_at`, both set on insert; `updated_at` is refreshed by every update
pub fn timestamps() -> SchemaFragment {
    SchemaFragment::new()
        .field(FieldDescriptor::datetime("created_at").default_with(now))
        .field(FieldDescriptor::datetime("updated_at").default_with(now))
        .before_update(|values| {
            values.insert("updated_at".to_string(), now());
        })
}

/// A `slug` derived from `source` on insert, with a random suffix so equal titles stay unique.
/// An explicitly given slug is kept.
pub fn slug(source: &str) -> SchemaFragment {
    let source = source.to_string();
    SchemaFragment::new()
        .field(FieldDescriptor::string("slug"))
        .before_insert(move |values| {
            if values.get("slug").is_some_and(|slug| !slug.is_null()) {
                return;
            }
            let Some(text) = values.get(&source).and_then(Value::as_str) else {
                return;
            };
            let slug = format!("{}-{}", slugify(text), random_suffix(6));
            values.insert("slug".to_string(), Value::Text(slug));
        })
}

/// Lowercase ASCII words joined by single dashes
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn random_suffix(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}
