//! Bucket operations

use metagate_cache::CacheTable;
use metagate_common::{Error, Result, StorageClass, now_ns};
use metagate_kv::{codec, with_retry};
use tracing::debug;

use crate::keys;
use crate::types::{Bucket, Lifecycle, LifecycleEntry};

use super::Meta;

impl Meta {
    /// Writes the bucket row plus the user-bucket index entry in one
    /// transaction.
    pub fn create_bucket(&self, bucket: &Bucket) -> Result<()> {
        with_retry(|| {
            let mut txn = self.txn();
            if txn.get(&bucket.key())?.is_some() {
                return Err(Error::BucketAlreadyExists(bucket.name.clone()));
            }
            txn.put(bucket.key(), codec::encode(bucket)?);
            txn.put(
                keys::user_bucket_key(&bucket.owner_id, &bucket.name),
                Vec::new(),
            );
            txn.commit()
        })?;
        debug!(bucket = %bucket.name, owner = %bucket.owner_id, "bucket created");
        Ok(())
    }

    /// Reads a bucket through the cache. Versioning-state decisions
    /// pass `will_need = false` so a mutation path never pins a
    /// stale row.
    pub fn get_bucket(&self, name: &str, will_need: bool) -> Result<Bucket> {
        self.cache
            .get(CacheTable::Bucket, name, will_need, || {
                self.load(&keys::bucket_key(name))
            })?
            .ok_or_else(|| Error::NoSuchBucket(name.to_string()))
    }

    /// Atomic overwrite, used by the ACL/cors/policy/website/
    /// encryption handlers.
    pub fn update_bucket(&self, bucket: &Bucket) -> Result<()> {
        self.put_row(&bucket.key(), bucket)?;
        self.invalidate_bucket(&bucket.name);
        Ok(())
    }

    /// Transactionally removes the bucket, its user-bucket entry and
    /// its lifecycle entry. The bucket must be empty.
    pub fn delete_bucket(&self, name: &str) -> Result<()> {
        let bucket = self.get_bucket(name, false)?;
        if !self.is_empty_bucket(name)? {
            return Err(Error::BucketNotEmpty(name.to_string()));
        }
        with_retry(|| {
            let mut txn = self.txn();
            txn.delete(bucket.key());
            txn.delete(keys::user_bucket_key(&bucket.owner_id, name));
            txn.delete(keys::lifecycle_key(name));
            txn.commit()
        })?;
        self.invalidate_bucket(name);
        Ok(())
    }

    /// No live object row (any version) and no in-flight multipart.
    pub fn is_empty_bucket(&self, name: &str) -> Result<bool> {
        let (start, end) = keys::bucket_objects_range(name);
        if !self.store().scan(&start, &end, 1)?.is_empty() {
            return Ok(false);
        }
        let (start, end) = keys::bucket_multiparts_range(name);
        Ok(self.store().scan(&start, &end, 1)?.is_empty())
    }

    /// All bucket names owned by one user, via the index.
    pub fn get_user_buckets(&self, owner_id: &str) -> Result<Vec<String>> {
        let (start, end) = keys::user_buckets_range(owner_id);
        let rows = self.store().scan(&start, &end, 0)?;
        let mut names = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            let parts = keys::split(&key);
            if let [_, _, bucket] = parts.as_slice() {
                names.push(String::from_utf8_lossy(bucket).into_owned());
            }
        }
        Ok(names)
    }

    /// Every `(bucket, owner)` pair, for the QoS bucket→user mirror.
    pub fn get_all_bucket_owners(&self) -> Result<Vec<(String, String)>> {
        let (start, end) = keys::all_users_range();
        let rows = self.store().scan(&start, &end, 0)?;
        let mut pairs = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            let parts = keys::split(&key);
            if let [_, owner, bucket] = parts.as_slice() {
                pairs.push((
                    String::from_utf8_lossy(bucket).into_owned(),
                    String::from_utf8_lossy(owner).into_owned(),
                ));
            }
        }
        Ok(pairs)
    }

    /// Applies a signed usage delta outside an object transaction.
    pub fn update_usage(&self, name: &str, class: StorageClass, delta: i64) -> Result<()> {
        with_retry(|| {
            let mut txn = self.txn();
            let key = keys::bucket_key(name);
            let Some(bytes) = txn.get(&key)? else {
                return Err(Error::NoSuchBucket(name.to_string()));
            };
            let mut bucket: Bucket = codec::decode(&bytes)?;
            bucket.apply_usage(class, delta);
            txn.put(key, codec::encode(&bucket)?);
            txn.commit()
        })?;
        self.invalidate_bucket(name);
        Ok(())
    }

    pub fn get_bucket_usage(&self, name: &str) -> Result<std::collections::BTreeMap<String, i64>> {
        Ok(self.get_bucket(name, false)?.usage)
    }

    /// Writes the rule set into the bucket row and maintains the
    /// lifecycle cross-index in the same transaction.
    pub fn put_bucket_lifecycle(&self, name: &str, lifecycle: Lifecycle) -> Result<()> {
        with_retry(|| {
            let mut txn = self.txn();
            let key = keys::bucket_key(name);
            let Some(bytes) = txn.get(&key)? else {
                return Err(Error::NoSuchBucket(name.to_string()));
            };
            let mut bucket: Bucket = codec::decode(&bytes)?;
            if lifecycle.is_empty() {
                bucket.lifecycle = None;
                txn.delete(keys::lifecycle_key(name));
            } else {
                let entry = LifecycleEntry {
                    bucket_name: name.to_string(),
                    status: "Enabled".to_string(),
                    start_time_ns: now_ns(),
                    end_time_ns: 0,
                };
                txn.put(entry.key(), codec::encode(&entry)?);
                bucket.lifecycle = Some(lifecycle.clone());
            }
            txn.put(key, codec::encode(&bucket)?);
            txn.commit()
        })?;
        self.invalidate_bucket(name);
        Ok(())
    }

    pub fn delete_bucket_lifecycle(&self, name: &str) -> Result<()> {
        self.put_bucket_lifecycle(name, Lifecycle::default())
    }

    /// One page of lifecycle entries, resuming after `marker`.
    pub fn scan_lifecycle(&self, marker: Option<&str>, limit: usize) -> Result<Vec<LifecycleEntry>> {
        let (range_start, end) = keys::lifecycle_range();
        let start = match marker {
            Some(m) => {
                let mut k = keys::lifecycle_key(m);
                k.push(0x00);
                k
            }
            None => range_start,
        };
        let rows = self.store().scan(&start, &end, limit)?;
        rows.iter().map(|(_, v)| codec::decode(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::tests::test_meta;
    use crate::types::LifecycleRule;
    use metagate_common::VersioningState;

    fn bucket(name: &str, owner: &str) -> Bucket {
        Bucket {
            name: name.to_string(),
            owner_id: owner.to_string(),
            created_at_ns: now_ns(),
            versioning: VersioningState::Disabled,
            ..Bucket::default()
        }
    }

    #[test]
    fn test_create_get_delete_bucket() {
        let (meta, _dir) = test_meta();
        meta.create_bucket(&bucket("mybucket", "u1")).unwrap();
        assert!(matches!(
            meta.create_bucket(&bucket("mybucket", "u1")),
            Err(Error::BucketAlreadyExists(_))
        ));

        let loaded = meta.get_bucket("mybucket", true).unwrap();
        assert_eq!(loaded.owner_id, "u1");
        assert_eq!(meta.get_user_buckets("u1").unwrap(), vec!["mybucket"]);

        meta.delete_bucket("mybucket").unwrap();
        assert!(meta.get_bucket("mybucket", false).is_err());
        assert!(meta.get_user_buckets("u1").unwrap().is_empty());
    }

    #[test]
    fn test_bucket_owners_mirror() {
        let (meta, _dir) = test_meta();
        meta.create_bucket(&bucket("aaa", "u1")).unwrap();
        meta.create_bucket(&bucket("bbb", "u2")).unwrap();
        let mut owners = meta.get_all_bucket_owners().unwrap();
        owners.sort();
        assert_eq!(
            owners,
            vec![
                ("aaa".to_string(), "u1".to_string()),
                ("bbb".to_string(), "u2".to_string())
            ]
        );
    }

    #[test]
    fn test_usage_tracking() {
        let (meta, _dir) = test_meta();
        meta.create_bucket(&bucket("mybucket", "u1")).unwrap();
        meta.update_usage("mybucket", StorageClass::Standard, 100)
            .unwrap();
        meta.update_usage("mybucket", StorageClass::Standard, -30)
            .unwrap();
        let usage = meta.get_bucket_usage("mybucket").unwrap();
        assert_eq!(usage.get("STANDARD"), Some(&70));
    }

    #[test]
    fn test_lifecycle_index_maintained() {
        let (meta, _dir) = test_meta();
        meta.create_bucket(&bucket("mybucket", "u1")).unwrap();
        let lc = Lifecycle {
            rules: vec![LifecycleRule {
                id: "all".into(),
                prefix: String::new(),
                expiry_days: 1,
                enabled: true,
            }],
        };
        meta.put_bucket_lifecycle("mybucket", lc).unwrap();
        let entries = meta.scan_lifecycle(None, 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].bucket_name, "mybucket");

        meta.delete_bucket_lifecycle("mybucket").unwrap();
        assert!(meta.scan_lifecycle(None, 10).unwrap().is_empty());
        assert!(meta.get_bucket("mybucket", false).unwrap().lifecycle.is_none());
    }

    #[test]
    fn test_lifecycle_pagination() {
        let (meta, _dir) = test_meta();
        for name in ["aaa", "bbb", "ccc"] {
            meta.create_bucket(&bucket(name, "u1")).unwrap();
            let lc = Lifecycle {
                rules: vec![LifecycleRule {
                    id: "all".into(),
                    prefix: String::new(),
                    expiry_days: 1,
                    enabled: true,
                }],
            };
            meta.put_bucket_lifecycle(name, lc).unwrap();
        }
        let page1 = meta.scan_lifecycle(None, 2).unwrap();
        assert_eq!(page1.len(), 2);
        let page2 = meta
            .scan_lifecycle(Some(&page1[1].bucket_name), 2)
            .unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].bucket_name, "ccc");
    }
}
