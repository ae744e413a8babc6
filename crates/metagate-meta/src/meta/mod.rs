//! The metadata service
//!
//! One `Meta` per process, owning the KV store handle and the
//! metadata cache. Operations are grouped by entity in the sibling
//! modules; everything that touches more than one key goes through a
//! single transaction.

mod bucket;
mod freezer;
mod gc;
pub mod list;
mod multipart;
mod object;
mod qos;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use metagate_cache::{CacheTable, MetaCache};
use metagate_common::{NULL_VERSION_EXTERNAL, NULL_VERSION_INTERNAL, Result};
use metagate_crypto::decode_version_id;
use metagate_kv::{KvStore, Txn, codec};

use crate::types::Object;

pub use list::{ListResult, VersionedListResult};
pub use multipart::MultipartListResult;

/// A caller-supplied version reference, resolved from the external
/// version id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRef {
    Null,
    Time(u64),
}

impl VersionRef {
    /// Parses an external version id. Accepts the client-facing
    /// `"null"` literal and the internal sentinel.
    pub fn parse(version_id: &str) -> Result<Self> {
        if version_id == NULL_VERSION_EXTERNAL || version_id == NULL_VERSION_INTERNAL {
            Ok(Self::Null)
        } else {
            Ok(Self::Time(decode_version_id(version_id)?))
        }
    }

    #[must_use]
    pub fn create_time_ns(self) -> Option<u64> {
        match self {
            Self::Null => None,
            Self::Time(ts) => Some(ts),
        }
    }
}

/// The metadata core.
pub struct Meta {
    store: Arc<dyn KvStore>,
    cache: MetaCache,
}

impl Meta {
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, cache: MetaCache) -> Self {
        Self { store, cache }
    }

    #[must_use]
    pub fn cache(&self) -> &MetaCache {
        &self.cache
    }

    pub(crate) fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    pub(crate) fn txn(&self) -> Txn<'_> {
        Txn::new(self.store.as_ref())
    }

    /// Typed point read.
    pub(crate) fn load<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.store.get(key)? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Typed point write outside any transaction.
    pub(crate) fn put_row<T: Serialize>(&self, key: &[u8], row: &T) -> Result<()> {
        self.store.put(key, &codec::encode(row)?)
    }

    pub(crate) fn object_cache_key(bucket: &str, name: &str, version: &str) -> String {
        format!("{bucket}:{name}:{version}")
    }

    pub(crate) fn invalidate_object(&self, object: &Object) {
        self.cache.remove(
            CacheTable::Object,
            &Self::object_cache_key(
                &object.bucket_name,
                &object.name,
                &object.version_component(),
            ),
        );
    }

    pub(crate) fn invalidate_bucket(&self, name: &str) {
        self.cache.remove(CacheTable::Bucket, name);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use metagate_kv::RedbStore;

    /// Fresh store-backed service with the cache off, so tests
    /// observe the authoritative rows.
    pub(crate) fn test_meta() -> (Meta, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("meta.redb")).unwrap();
        (Meta::new(Arc::new(store), MetaCache::disabled()), dir)
    }
}
