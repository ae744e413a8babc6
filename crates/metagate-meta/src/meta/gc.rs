//! Garbage record operations

use metagate_common::{Result, now_ns};
use metagate_kv::{codec, with_retry};
use tracing::warn;

use crate::keys;
use crate::types::{GarbageRecord, GcStatus, MAX_GC_TRIES};

use super::Meta;

impl Meta {
    /// Enqueues a tombstone. Idempotent per blob: the key is derived
    /// from the blob identity, so re-enqueueing overwrites in place.
    pub fn put_garbage(&self, record: &GarbageRecord) -> Result<()> {
        self.put_row(&record.key(), record)
    }

    /// One unfiltered page of records, for tests and inspection.
    pub fn scan_garbage(&self, limit: usize) -> Result<Vec<GarbageRecord>> {
        let (start, end) = keys::gc_range();
        let rows = self.store().scan(&start, &end, limit)?;
        rows.iter().map(|(_, v)| codec::decode(v)).collect()
    }

    /// Claims up to `limit` records for one worker pass: pending
    /// records, plus deleting records whose claim is older than
    /// `stuck_reset_ns` (their worker died mid-delete). Claimed rows
    /// flip to `Deleting` with a fresh mtime in one transaction.
    pub fn claim_garbage(&self, limit: usize, stuck_reset_ns: u64) -> Result<Vec<GarbageRecord>> {
        let now = now_ns();
        with_retry(|| {
            let mut txn = self.txn();
            let (start, end) = keys::gc_range();
            let mut claimed = Vec::new();
            for (key, bytes) in txn.scan(&start, &end, 0)? {
                if claimed.len() >= limit {
                    break;
                }
                let mut record: GarbageRecord = codec::decode(&bytes)?;
                let claimable = match record.status {
                    GcStatus::Pending => true,
                    GcStatus::Deleting => now.saturating_sub(record.mtime_ns) > stuck_reset_ns,
                };
                if !claimable {
                    continue;
                }
                record.status = GcStatus::Deleting;
                record.mtime_ns = now;
                txn.put(key, codec::encode(&record)?);
                claimed.push(record);
            }
            txn.commit()?;
            Ok(claimed)
        })
    }

    /// Books a failed removal attempt. The record goes back to
    /// pending for another pass, or is dropped once the try budget
    /// is spent.
    pub fn fail_garbage(&self, record: &GarbageRecord) -> Result<()> {
        let mut record = record.clone();
        record.tried_times += 1;
        if record.tried_times >= MAX_GC_TRIES {
            warn!(
                bucket = %record.bucket_name,
                object = %record.object_name,
                object_id = %record.object_id,
                tries = record.tried_times,
                "giving up on garbage record"
            );
            return self.delete_garbage(&record);
        }
        record.status = GcStatus::Pending;
        record.mtime_ns = now_ns();
        self.put_row(&record.key(), &record)
    }

    /// Removes a fully collected record.
    pub fn delete_garbage(&self, record: &GarbageRecord) -> Result<()> {
        self.store().delete(&record.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::tests::test_meta;

    fn record(object_id: &str) -> GarbageRecord {
        GarbageRecord {
            bucket_name: "bkt".into(),
            object_name: "obj".into(),
            version: "0".into(),
            pool: "tiger".into(),
            location: "c1".into(),
            object_id: object_id.into(),
            mtime_ns: now_ns(),
            ..GarbageRecord::default()
        }
    }

    #[test]
    fn test_claim_flips_to_deleting() {
        let (meta, _dir) = test_meta();
        meta.put_garbage(&record("blob-1")).unwrap();
        meta.put_garbage(&record("blob-2")).unwrap();

        let claimed = meta.claim_garbage(10, 60_000_000_000).unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(claimed.iter().all(|r| r.status == GcStatus::Deleting));

        // A second pass sees nothing claimable.
        assert!(meta.claim_garbage(10, 60_000_000_000).unwrap().is_empty());
    }

    #[test]
    fn test_racing_claims_cannot_both_win() {
        let (meta, _dir) = test_meta();
        meta.put_garbage(&record("blob-racy")).unwrap();
        let key = record("blob-racy").key();

        // Two workers observe the same pending record before either
        // commits its claim.
        let mut first = meta.txn();
        let mut second = meta.txn();
        for txn in [&mut first, &mut second] {
            let bytes = txn.get(&key).unwrap().unwrap();
            let mut claimed: GarbageRecord = codec::decode(&bytes).unwrap();
            claimed.status = GcStatus::Deleting;
            claimed.mtime_ns = now_ns();
            txn.put(key.clone(), codec::encode(&claimed).unwrap());
        }
        first.commit().unwrap();
        assert!(matches!(
            second.commit(),
            Err(metagate_common::Error::Conflict)
        ));

        // The loser's retry re-scans and finds nothing claimable.
        assert!(meta.claim_garbage(10, 60_000_000_000).unwrap().is_empty());
    }

    #[test]
    fn test_stuck_deleting_is_reclaimed() {
        let (meta, _dir) = test_meta();
        let mut stuck = record("blob-1");
        stuck.status = GcStatus::Deleting;
        stuck.mtime_ns = now_ns() - 120_000_000_000;
        meta.put_garbage(&stuck).unwrap();

        let claimed = meta.claim_garbage(10, 60_000_000_000).unwrap();
        assert_eq!(claimed.len(), 1);
    }

    #[test]
    fn test_fail_garbage_respects_try_budget() {
        let (meta, _dir) = test_meta();
        let r = record("blob-1");
        meta.put_garbage(&r).unwrap();

        let claimed = meta.claim_garbage(10, 60_000_000_000).unwrap();
        meta.fail_garbage(&claimed[0]).unwrap();
        let back = meta.scan_garbage(10).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].tried_times, 1);
        assert_eq!(back[0].status, GcStatus::Pending);

        // Exhaust the budget: the record disappears.
        let claimed = meta.claim_garbage(10, 60_000_000_000).unwrap();
        meta.fail_garbage(&claimed[0]).unwrap();
        let claimed = meta.claim_garbage(10, 60_000_000_000).unwrap();
        meta.fail_garbage(&claimed[0]).unwrap();
        assert!(meta.scan_garbage(10).unwrap().is_empty());
    }

    #[test]
    fn test_other_records_unaffected_by_failure() {
        let (meta, _dir) = test_meta();
        meta.put_garbage(&record("blob-1")).unwrap();
        meta.put_garbage(&record("blob-2")).unwrap();

        let claimed = meta.claim_garbage(1, 60_000_000_000).unwrap();
        assert_eq!(claimed.len(), 1);
        meta.fail_garbage(&claimed[0]).unwrap();

        let all = meta.scan_garbage(10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|r| r.tried_times == 0).count(), 1);
    }

    #[test]
    fn test_delete_garbage() {
        let (meta, _dir) = test_meta();
        let r = record("blob-1");
        meta.put_garbage(&r).unwrap();
        meta.delete_garbage(&r).unwrap();
        assert!(meta.scan_garbage(10).unwrap().is_empty());
    }
}
