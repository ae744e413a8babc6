//! Restore (freezer) operations

use metagate_common::{Error, Result, now_ns};
use metagate_kv::{codec, with_retry};
use tracing::debug;

use crate::keys;
use crate::types::{Freezer, FreezerStatus, GarbageRecord};

use super::Meta;

impl Meta {
    /// Registers a restore request. A finished thaw whose copy is
    /// still around only has its TTL extended; re-requesting an
    /// in-flight restore is a no-op.
    pub fn create_freezer(&self, freezer: &Freezer) -> Result<()> {
        with_retry(|| {
            let mut txn = self.txn();
            let key = freezer.key();
            if let Some(bytes) = txn.get(&key)? {
                let mut existing: Freezer = codec::decode(&bytes)?;
                match existing.status {
                    FreezerStatus::Ready | FreezerStatus::Restoring => return txn.commit(),
                    FreezerStatus::Finished => {
                        // Keep the thawed copy, push the deadline out.
                        existing.life_time_days = freezer.life_time_days;
                        existing.create_time_ns = now_ns();
                        txn.put(key, codec::encode(&existing)?);
                        return txn.commit();
                    }
                }
            }
            txn.put(key, codec::encode(freezer)?);
            txn.commit()
        })?;
        debug!(
            bucket = %freezer.bucket_name,
            object = %freezer.object_name,
            version = %freezer.version,
            "restore requested"
        );
        Ok(())
    }

    pub fn get_freezer(&self, bucket: &str, object: &str, version: &str) -> Result<Freezer> {
        self.load(&keys::freezer_key(bucket, object, version))?
            .ok_or_else(|| Error::no_such_key(bucket, object))
    }

    /// Compare-and-set status transition. Fails when the stored
    /// status is no longer `from`, so two workers cannot both win
    /// the same restore.
    pub fn update_freezer_status(
        &self,
        freezer: &Freezer,
        from: FreezerStatus,
        to: FreezerStatus,
    ) -> Result<Freezer> {
        with_retry(|| {
            let mut txn = self.txn();
            let key = freezer.key();
            let Some(bytes) = txn.get(&key)? else {
                return Err(Error::no_such_key(
                    &freezer.bucket_name,
                    &freezer.object_name,
                ));
            };
            let stored: Freezer = codec::decode(&bytes)?;
            if stored.status != from {
                return Err(Error::InvalidStatus(format!(
                    "freezer is {:?}, expected {from:?}",
                    stored.status
                )));
            }
            let mut updated = freezer.clone();
            updated.status = to;
            if to == FreezerStatus::Finished {
                updated.create_time_ns = now_ns();
            }
            txn.put(key, codec::encode(&updated)?);
            txn.commit()?;
            Ok(updated)
        })
    }

    /// Drops the freezer row and enqueues the thawed copy for
    /// collection in the same transaction.
    pub fn delete_freezer(&self, freezer: &Freezer) -> Result<()> {
        with_retry(|| {
            let mut txn = self.txn();
            txn.delete(freezer.key());
            if !freezer.object_id.is_empty() || !freezer.parts.is_empty() {
                let record = GarbageRecord {
                    bucket_name: freezer.bucket_name.clone(),
                    object_name: freezer.object_name.clone(),
                    version: freezer.version.clone(),
                    location: freezer.location.clone(),
                    pool: freezer.pool.clone(),
                    object_id: freezer.object_id.clone(),
                    parts: freezer.parts.values().cloned().collect(),
                    mtime_ns: now_ns(),
                    ..GarbageRecord::default()
                };
                txn.put(record.key(), codec::encode(&record)?);
            }
            txn.commit()
        })
    }

    /// One page of freezer rows for the restore worker.
    pub fn scan_freezers(&self, limit: usize) -> Result<Vec<Freezer>> {
        let (start, end) = keys::freezer_range();
        let rows = self.store().scan(&start, &end, limit)?;
        rows.iter().map(|(_, v)| codec::decode(v)).collect()
    }
}
