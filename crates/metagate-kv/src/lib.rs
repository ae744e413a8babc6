//! Metagate KV - transactional key-value client
//!
//! The metadata plane stores every entity in one flat byte-keyed
//! keyspace. This crate provides the store trait, the embedded redb
//! implementation, a write-buffered transaction type, and the
//! MessagePack row codec.

pub mod codec;
pub mod store;
pub mod txn;

pub use store::{KvStore, RedbStore, WriteBatch};
pub use txn::Txn;

use metagate_common::Result;

/// Runs `f`, retrying once with fresh state when it fails with a
/// retryable error (conflict, timeout).
pub fn with_retry<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
    match f() {
        Err(e) if e.is_retryable() => {
            tracing::debug!(error = %e, "retrying kv operation");
            f()
        }
        other => other,
    }
}
