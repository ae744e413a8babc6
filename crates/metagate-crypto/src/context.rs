//! Canonical KMS context encoding
//!
//! A context is a set of key-value pairs cryptographically bound to a
//! sealed key. The byte encoding must be canonical so that sealing
//! and unsealing agree: keys sorted lexicographically, values as
//! strings, no whitespace.

use std::collections::BTreeMap;

use metagate_common::{Error, Result};

/// Key-value pairs bound to a sealed object key.
pub type Context = BTreeMap<String, String>;

/// Encodes the context as a canonical JSON object. `BTreeMap`
/// iteration order gives the sorted keys; `serde_json` emits no
/// whitespace.
pub fn context_bytes(ctx: &Context) -> Result<Vec<u8>> {
    serde_json::to_vec(ctx).map_err(|e| Error::Serialization(e.to_string()))
}

/// Builds the standard context for an object: bucket and object name.
#[must_use]
pub fn object_context(bucket: &str, object: &str) -> Context {
    let mut ctx = Context::new();
    ctx.insert("bucket".to_string(), bucket.to_string());
    ctx.insert("object".to_string(), object.to_string());
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_bytes_sorted_no_whitespace() {
        let mut ctx = Context::new();
        ctx.insert("zeta".to_string(), "1".to_string());
        ctx.insert("alpha".to_string(), "2".to_string());
        let bytes = context_bytes(&ctx).unwrap();
        assert_eq!(bytes, br#"{"alpha":"2","zeta":"1"}"#);
    }

    #[test]
    fn test_empty_context() {
        assert_eq!(context_bytes(&Context::new()).unwrap(), b"{}");
    }

    #[test]
    fn test_object_context_stable() {
        let a = context_bytes(&object_context("b", "k")).unwrap();
        let b = context_bytes(&object_context("b", "k")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, br#"{"bucket":"b","object":"k"}"#);
    }
}
