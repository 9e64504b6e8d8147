//! Cache parameter configuration
//!
//! This module defines the CacheParams struct
//! tying a store to the expiry applied when callers name none.

use crate::expiry::Expiry;
use crate::store::CacheStore;
use std::sync::Arc;

/// Cache parameters shared by every cache-aware call of one session
#[derive(Debug, Clone)]
pub struct CacheParams {
    /// The store entries are persisted in
    pub store: Arc<dyn CacheStore>,
    /// Expiry applied when a call does not name one
    pub default_expiry: Expiry,
}

impl CacheParams {
    pub fn new(store: Arc<dyn CacheStore>, default_ttl_seconds: Option<u64>) -> Self {
        Self {
            store,
            default_expiry: default_ttl_seconds.map_or(Expiry::Never, Expiry::Seconds),
        }
    }

    /// The explicit expiry when given, otherwise the session default
    pub fn expiry_or_default(&self, explicit: Option<&Expiry>) -> Expiry {
        explicit.cloned().unwrap_or_else(|| self.default_expiry.clone())
    }
}
