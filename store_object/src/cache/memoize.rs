//! Memoized function calls
//!
//! A memoized call is keyed by the function identity and its serialized
//! arguments. While the function runs, every row it reads through the session
//! is recorded in a dependency scope, so a later write to any of those rows
//! drops the cached result.

use crate::dal::Dal;
use crate::errors::DalError;
use cache_system::{function_key, CacheEntry, CacheStatus, DependencyScope, Expiry};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::panic::Location;

/// Memoize `f(args)`, identified by the function's type and the call site.
///
/// Every call site gets its own cache slot, so two closures written on
/// different lines never share results. A helper that wraps this function
/// shares one slot across all of its callers; use [`memoize_named`] there.
#[track_caller]
pub fn memoize<'a, F, Fut, A, T>(
    dal: &'a Dal,
    f: F,
    args: A,
    expiry: Option<Expiry>,
) -> impl Future<Output = Result<(T, CacheStatus), DalError>> + 'a
where
    F: FnOnce(A) -> Fut + 'a,
    Fut: Future<Output = Result<T, DalError>> + 'a,
    A: Serialize + 'a,
    T: Serialize + DeserializeOwned + 'a,
{
    let identity = call_site_identity::<F>(Location::caller());
    async move { memoize_named(dal, &identity, f, args, expiry).await }
}

fn call_site_identity<F>(caller: &Location<'_>) -> String {
    format!(
        "{}@{}:{}:{}",
        std::any::type_name::<F>(),
        caller.file(),
        caller.line(),
        caller.column()
    )
}

pub async fn memoize_named<F, Fut, A, T>(
    dal: &Dal,
    identity: &str,
    f: F,
    args: A,
    expiry: Option<Expiry>,
) -> Result<(T, CacheStatus), DalError>
where
    F: FnOnce(A) -> Fut,
    Fut: Future<Output = Result<T, DalError>>,
    A: Serialize,
    T: Serialize + DeserializeOwned,
{
    let Some(params) = dal.cache() else {
        crate::debug_log!("caching is disabled; calling {} directly", identity);
        return Ok((f(args).await?, CacheStatus::Fresh));
    };

    let key = match function_key(identity, &args) {
        Ok(key) => key,
        Err(error) => {
            tracing::warn!("arguments of {} cannot be cached: {}", identity, error);
            return Ok((f(args).await?, CacheStatus::Fresh));
        }
    };
    match params.store.load(&key).await {
        Ok(Some(entry)) => match serde_json::from_str::<T>(&entry.payload) {
            Ok(value) => {
                DependencyScope::record_all(entry.dependencies.iter().cloned());
                crate::debug_log!("memoized {} served from cache ({})", identity, key);
                return Ok((value, CacheStatus::Cached));
            }
            Err(error) => tracing::warn!("ignoring unreadable cache entry {}: {}", key, error),
        },
        Ok(None) => {}
        Err(error) => tracing::warn!("cache lookup of {} failed: {}", key, error),
    }

    let (result, dependencies) = DependencyScope::track(f(args)).await;
    let value = result?;

    let expires_at = params.expiry_or_default(expiry.as_ref()).resolve(Utc::now())?;
    let payload = match serde_json::to_string(&value) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!("result of {} cannot be cached: {}", identity, error);
            return Ok((value, CacheStatus::Fresh));
        }
    };
    let entry = CacheEntry::new(key, payload, expires_at, dependencies);
    match params.store.save(&entry).await {
        Ok(()) => crate::debug_log!(
            "memoized {} with {} dependencies",
            identity,
            entry.dependencies.len()
        ),
        Err(error) => tracing::warn!("caching result of {} failed: {}", identity, error),
    }
    Ok((value, CacheStatus::Fresh))
}
