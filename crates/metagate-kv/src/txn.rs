//! Write-buffered transactions
//!
//! A transaction stages puts and deletes in memory with read-through
//! to the underlying store; commit applies the whole buffer as one
//! atomic batch. Every store row observed through the transaction is
//! pinned in a read set, and commit re-validates it inside the
//! store's write transaction: when another writer changed a row read
//! here, commit fails with a conflict instead of clobbering, so
//! check-then-write sequences stay correct across concurrent
//! transactions. Dropping an uncommitted transaction discards it.

use std::cell::RefCell;
use std::collections::BTreeMap;

use metagate_common::Result;

use crate::store::{KvStore, WriteBatch};

enum Staged {
    Put(Vec<u8>),
    Delete,
}

/// A pending transaction over a [`KvStore`].
pub struct Txn<'a> {
    store: &'a dyn KvStore,
    staged: BTreeMap<Vec<u8>, Staged>,
    /// First-observed store value per key read, absent rows
    /// included.
    reads: RefCell<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl<'a> Txn<'a> {
    #[must_use]
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self {
            store,
            staged: BTreeMap::new(),
            reads: RefCell::new(BTreeMap::new()),
        }
    }

    /// Reads through the staged buffer first, then the store.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.staged.get(key) {
            Some(Staged::Put(v)) => Ok(Some(v.clone())),
            Some(Staged::Delete) => Ok(None),
            None => {
                let value = self.store.get(key)?;
                self.reads
                    .borrow_mut()
                    .entry(key.to_vec())
                    .or_insert_with(|| value.clone());
                Ok(value)
            }
        }
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.staged.insert(key.into(), Staged::Put(value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.staged.insert(key.into(), Staged::Delete);
    }

    /// Merged scan over the store and the staged buffer, ascending by
    /// key. `limit == 0` means unbounded.
    pub fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        // Staged rows can shadow or shrink the store view, so the
        // store scan itself must stay unbounded and the limit is
        // applied after the merge.
        let base = self.store.scan(start, end, 0)?;
        {
            let mut reads = self.reads.borrow_mut();
            for (k, v) in &base {
                reads
                    .entry(k.clone())
                    .or_insert_with(|| Some(v.clone()));
            }
        }
        let mut base_iter = base.into_iter().peekable();
        let mut staged_iter = self
            .staged
            .range(start.to_vec()..end.to_vec())
            .map(|(k, v)| (k.clone(), v))
            .peekable();

        let mut out: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        loop {
            if limit != 0 && out.len() >= limit {
                break;
            }
            let take_staged = match (base_iter.peek(), staged_iter.peek()) {
                (None, None) => break,
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (Some((bk, _)), Some((sk, _))) => sk <= bk,
            };
            if take_staged {
                if let Some((sk, sv)) = staged_iter.next() {
                    // Skip the shadowed store row, if any.
                    if base_iter.peek().is_some_and(|(bk, _)| *bk == sk) {
                        base_iter.next();
                    }
                    if let Staged::Put(v) = sv {
                        out.push((sk, v.clone()));
                    }
                }
            } else if let Some((bk, bv)) = base_iter.next() {
                out.push((bk, bv));
            }
        }
        Ok(out)
    }

    /// Applies every staged mutation atomically, after validating
    /// that no row read through this transaction changed underneath.
    /// Fails with [`metagate_common::Error::Conflict`] (retryable)
    /// when one did.
    pub fn commit(self) -> Result<()> {
        let mut batch = WriteBatch::default();
        for (k, v) in self.staged {
            match v {
                Staged::Put(value) => batch.puts.push((k, value)),
                Staged::Delete => batch.deletes.push(k),
            }
        }
        if batch.is_empty() {
            return Ok(());
        }
        batch.checks = self.reads.into_inner().into_iter().collect();
        self.store.apply(batch)
    }

    /// Discards every staged mutation.
    pub fn rollback(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RedbStore;

    fn open_store() -> (RedbStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("meta.redb")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_read_through_and_commit() {
        let (store, _dir) = open_store();
        store.put(b"a", b"1").unwrap();

        let mut txn = Txn::new(&store);
        assert_eq!(txn.get(b"a").unwrap(), Some(b"1".to_vec()));
        txn.put(b"b".to_vec(), b"2".to_vec());
        txn.delete(b"a".to_vec());
        assert_eq!(txn.get(b"a").unwrap(), None);
        assert_eq!(txn.get(b"b").unwrap(), Some(b"2".to_vec()));

        // Not visible until commit.
        assert_eq!(store.get(b"b").unwrap(), None);
        txn.commit().unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_conflicting_writers_cannot_both_commit() {
        let (store, _dir) = open_store();
        store.put(b"state", b"pending").unwrap();

        // Both transactions observe the same row before either
        // commits.
        let mut first = Txn::new(&store);
        let mut second = Txn::new(&store);
        assert_eq!(first.get(b"state").unwrap(), Some(b"pending".to_vec()));
        assert_eq!(second.get(b"state").unwrap(), Some(b"pending".to_vec()));
        first.put(b"state".to_vec(), b"claimed-by-1".to_vec());
        second.put(b"state".to_vec(), b"claimed-by-2".to_vec());

        first.commit().unwrap();
        assert!(matches!(
            second.commit(),
            Err(metagate_common::Error::Conflict)
        ));
        assert_eq!(store.get(b"state").unwrap(), Some(b"claimed-by-1".to_vec()));
    }

    #[test]
    fn test_conflict_on_row_created_behind_reader() {
        let (store, _dir) = open_store();
        let mut txn = Txn::new(&store);
        // The existence check observed an absent row.
        assert_eq!(txn.get(b"bucket").unwrap(), None);
        store.put(b"bucket", b"someone-else").unwrap();
        txn.put(b"bucket".to_vec(), b"me".to_vec());
        assert!(matches!(
            txn.commit(),
            Err(metagate_common::Error::Conflict)
        ));
    }

    #[test]
    fn test_blind_write_does_not_conflict() {
        let (store, _dir) = open_store();
        store.put(b"k", b"old").unwrap();
        let mut txn = Txn::new(&store);
        // Never read, so last write wins without validation.
        txn.put(b"k".to_vec(), b"new".to_vec());
        store.put(b"k", b"other").unwrap();
        txn.commit().unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn test_rollback_discards() {
        let (store, _dir) = open_store();
        let mut txn = Txn::new(&store);
        txn.put(b"x".to_vec(), b"1".to_vec());
        txn.rollback();
        assert_eq!(store.get(b"x").unwrap(), None);
    }

    #[test]
    fn test_merged_scan() {
        let (store, _dir) = open_store();
        store.put(b"k1", b"a").unwrap();
        store.put(b"k3", b"c").unwrap();
        store.put(b"k4", b"d").unwrap();

        let mut txn = Txn::new(&store);
        txn.put(b"k2".to_vec(), b"b".to_vec());
        txn.put(b"k3".to_vec(), b"C".to_vec());
        txn.delete(b"k4".to_vec());

        let rows = txn.scan(b"k", b"k\xff", 0).unwrap();
        let keys: Vec<_> = rows.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"k1".to_vec(), b"k2".to_vec(), b"k3".to_vec()]);
        assert_eq!(rows[2].1, b"C".to_vec());
    }

    #[test]
    fn test_merged_scan_limit() {
        let (store, _dir) = open_store();
        store.put(b"k1", b"a").unwrap();
        let mut txn = Txn::new(&store);
        txn.put(b"k0".to_vec(), b"z".to_vec());
        let rows = txn.scan(b"k", b"k\xff", 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, b"k0".to_vec());
    }
}
