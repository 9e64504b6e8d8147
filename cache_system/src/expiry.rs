//! Expiry of cache entries
//!
//! An entry expires at an absolute instant computed when it is saved.

use crate::errors::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When a cache entry stops being served
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Expiry {
    /// Kept until invalidated or cleared
    #[default]
    Never,
    /// Literal expiry timestamp
    At(DateTime<Utc>),
    /// Relative to the moment the entry is saved
    After(Duration),
    /// Seconds relative to the moment the entry is saved
    Seconds(u64),
}

impl Expiry {
    /// Build an expiry from the two ways callers can name one. Naming both is an error.
    pub fn from_parts(
        ttl: Option<Duration>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self, CacheError> {
        match (ttl, expires_at) {
            (Some(_), Some(_)) => Err(CacheError::InvalidExpiry(
                "pass either a ttl or an expiry timestamp, not both".to_string(),
            )),
            (Some(ttl), None) => Ok(Expiry::After(ttl)),
            (None, Some(at)) => Ok(Expiry::At(at)),
            (None, None) => Ok(Expiry::Never),
        }
    }

    /// Absolute expiry for an entry saved at `now`
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CacheError> {
        match self {
            Expiry::Never => Ok(None),
            Expiry::At(at) => Ok(Some(*at)),
            Expiry::After(duration) => chrono::Duration::from_std(*duration)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .map(Some)
                .ok_or_else(|| CacheError::InvalidExpiry(format!("{:?} is out of range", duration))),
            Expiry::Seconds(seconds) => i64::try_from(*seconds)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .and_then(|delta| now.checked_add_signed(delta))
                .map(Some)
                .ok_or_else(|| CacheError::InvalidExpiry(format!("{} seconds is out of range", seconds))),
        }
    }
}

impl From<Duration> for Expiry {
    fn from(duration: Duration) -> Self {
        Expiry::After(duration)
    }
}

impl From<DateTime<Utc>> for Expiry {
    fn from(at: DateTime<Utc>) -> Self {
        Expiry::At(at)
    }
}
