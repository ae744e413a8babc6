//! Store trait and the embedded redb implementation
//!
//! All tables share one redb table keyed by raw bytes; the key codec
//! upstream keeps the namespaces apart. Multi-key mutations go
//! through [`WriteBatch`] so they land in a single redb write
//! transaction.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use metagate_common::{Error, Result};

const TABLE: TableDefinition<'_, &[u8], &[u8]> = TableDefinition::new("metagate_meta");

/// A set of puts and deletes applied atomically. Each check pins a
/// key to the value the writer observed; the batch is rejected with
/// a conflict when any of them changed underneath.
#[derive(Debug, Default)]
pub struct WriteBatch {
    pub puts: Vec<(Vec<u8>, Vec<u8>)>,
    pub deletes: Vec<Vec<u8>>,
    pub checks: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }
}

/// Raw operations every metadata store must provide.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Returns up to `limit` pairs with `start <= k < end` in
    /// ascending key order. `limit == 0` means unbounded.
    fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Applies all puts and deletes in one atomic transaction.
    fn apply(&self, batch: WriteBatch) -> Result<()>;
}

/// Embedded store backed by a single redb database file.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Opens (or creates) the database at `path` and ensures the
    /// metadata table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(|e| Error::kv(e.to_string()))?;
        let store = Self { db };
        store.apply(WriteBatch::default())?;
        Ok(store)
    }
}

impl KvStore for RedbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(|e| Error::kv(e.to_string()))?;
        let table = txn.open_table(TABLE).map_err(|e| Error::kv(e.to_string()))?;
        let value = table.get(key).map_err(|e| Error::kv(e.to_string()))?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.apply(WriteBatch {
            puts: vec![(key.to_vec(), value.to_vec())],
            ..WriteBatch::default()
        })
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.apply(WriteBatch {
            deletes: vec![key.to_vec()],
            ..WriteBatch::default()
        })
    }

    fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(|e| Error::kv(e.to_string()))?;
        let table = txn.open_table(TABLE).map_err(|e| Error::kv(e.to_string()))?;
        let mut out = Vec::new();
        let range = table.range(start..end).map_err(|e| Error::kv(e.to_string()))?;
        for entry in range {
            let (k, v) = entry.map_err(|e| Error::kv(e.to_string()))?;
            out.push((k.value().to_vec(), v.value().to_vec()));
            if limit != 0 && out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        let txn = self.db.begin_write().map_err(|e| Error::kv(e.to_string()))?;
        {
            let mut table = txn.open_table(TABLE).map_err(|e| Error::kv(e.to_string()))?;
            // The write transaction is exclusive, so validating the
            // read set here serializes every conflicting writer.
            for (k, expected) in &batch.checks {
                let current = table
                    .get(k.as_slice())
                    .map_err(|e| Error::kv(e.to_string()))?
                    .map(|v| v.value().to_vec());
                if current != *expected {
                    return Err(Error::Conflict);
                }
            }
            for (k, v) in &batch.puts {
                table
                    .insert(k.as_slice(), v.as_slice())
                    .map_err(|e| Error::kv(e.to_string()))?;
            }
            for k in &batch.deletes {
                table
                    .remove(k.as_slice())
                    .map_err(|e| Error::kv(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| Error::kv(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (RedbStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("meta.redb")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_put_get_delete() {
        let (store, _dir) = open_store();
        assert_eq!(store.get(b"k").unwrap(), None);
        store.put(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        store.delete(b"k").unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
    }

    #[test]
    fn test_scan_ordered_and_limited() {
        let (store, _dir) = open_store();
        for k in [b"a/3", b"a/1", b"a/2", b"b/1"] {
            store.put(k, b"v").unwrap();
        }
        let all = store.scan(b"a/", b"a/\xff", 0).unwrap();
        let keys: Vec<_> = all.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"a/1".as_slice(), b"a/2", b"a/3"]);

        let two = store.scan(b"a/", b"a/\xff", 2).unwrap();
        assert_eq!(two.len(), 2);
    }

    #[test]
    fn test_apply_is_atomic_per_batch() {
        let (store, _dir) = open_store();
        store.put(b"old", b"1").unwrap();
        store
            .apply(WriteBatch {
                puts: vec![(b"new".to_vec(), b"2".to_vec())],
                deletes: vec![b"old".to_vec()],
                ..WriteBatch::default()
            })
            .unwrap();
        assert_eq!(store.get(b"old").unwrap(), None);
        assert_eq!(store.get(b"new").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_apply_rejects_stale_checks() {
        let (store, _dir) = open_store();
        store.put(b"k", b"1").unwrap();

        let stale = WriteBatch {
            puts: vec![(b"k".to_vec(), b"2".to_vec())],
            checks: vec![(b"k".to_vec(), Some(b"0".to_vec()))],
            ..WriteBatch::default()
        };
        assert!(matches!(store.apply(stale), Err(Error::Conflict)));
        assert_eq!(store.get(b"k").unwrap(), Some(b"1".to_vec()));

        let fresh = WriteBatch {
            puts: vec![(b"k".to_vec(), b"2".to_vec())],
            checks: vec![(b"k".to_vec(), Some(b"1".to_vec()))],
            ..WriteBatch::default()
        };
        store.apply(fresh).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"2".to_vec()));
    }
}
