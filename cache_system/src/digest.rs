//! Deterministic cache keys
//!
//! Keys are the hex SHA-256 of the canonical JSON of whatever identifies the
//! cached computation. `serde_json` maps are ordered, so the same input digests
//! to the same key in every process.

use crate::errors::CacheError;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hex SHA-256 digest of the JSON serialization of `value`
pub fn digest<T: Serialize + ?Sized>(value: &T) -> Result<String, CacheError> {
    let bytes = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Key of a memoized call: function identity plus its serialized arguments
pub fn function_key<A: Serialize + ?Sized>(identity: &str, args: &A) -> Result<String, CacheError> {
    #[derive(Serialize)]
    struct FunctionCall<'a, A: Serialize + ?Sized> {
        function: &'a str,
        args: &'a A,
    }

    digest(&FunctionCall {
        function: identity,
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_digest_is_stable() {
        let mut a = BTreeMap::new();
        a.insert("b", 2);
        a.insert("a", 1);
        let mut b = BTreeMap::new();
        b.insert("a", 1);
        b.insert("b", 2);
        assert_eq!(digest(&a).unwrap(), digest(&b).unwrap());
        assert_eq!(digest(&a).unwrap().len(), 64);
    }

    #[test]
    fn test_function_key_depends_on_identity_and_args() {
        let one = function_key("app::report", &(1, "x")).unwrap();
        assert_eq!(one, function_key("app::report", &(1, "x")).unwrap());
        assert_ne!(one, function_key("app::report", &(2, "x")).unwrap());
        assert_ne!(one, function_key("app::summary", &(1, "x")).unwrap());
    }
}
