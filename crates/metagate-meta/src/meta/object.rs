//! Object operations and the version state machine

use metagate_cache::CacheTable;
use metagate_common::{Error, Result, StorageClass, VersioningState, now_ns};
use metagate_kv::{Txn, codec, with_retry};
use tracing::debug;

use crate::keys;
use crate::types::{GarbageRecord, Multipart, Object};

use super::{Meta, VersionRef};

impl Meta {
    /// Reads one object version through the cache.
    pub fn get_object(
        &self,
        bucket: &str,
        name: &str,
        version: VersionRef,
        will_need: bool,
    ) -> Result<Object> {
        let component = match version {
            VersionRef::Null => metagate_common::NULL_VERSION_INTERNAL.to_string(),
            VersionRef::Time(ts) => keys::version_component(ts),
        };
        let cache_key = Self::object_cache_key(bucket, name, &component);
        self.cache
            .get(CacheTable::Object, &cache_key, will_need, || {
                self.load(&keys::object_key(bucket, name, version.create_time_ns()))
            })?
            .ok_or_else(|| match version {
                VersionRef::Null => Error::no_such_key(bucket, name),
                VersionRef::Time(ts) => Error::NoSuchVersion {
                    bucket: bucket.to_string(),
                    key: name.to_string(),
                    version: keys::version_component(ts),
                },
            })
    }

    /// Newest version of a name: the null row and the newest
    /// versioned row merged by create time.
    pub fn get_latest_object_version(&self, bucket: &str, name: &str) -> Result<Object> {
        let null_row: Option<Object> = self.load(&keys::object_key(bucket, name, None))?;
        let (start, end) = {
            let prefix = keys::object_key(bucket, name, None);
            let mut s = prefix.clone();
            s.push(keys::SEP);
            s.push(0x00);
            let mut e = prefix;
            e.push(keys::SEP);
            e.push(0xFF);
            (s, e)
        };
        let newest_versioned: Option<Object> = match self.store().scan(&start, &end, 1)?.first() {
            Some((_, bytes)) => Some(codec::decode(bytes)?),
            None => None,
        };
        match (null_row, newest_versioned) {
            (Some(n), Some(v)) => Ok(if n.create_time_ns >= v.create_time_ns {
                n
            } else {
                v
            }),
            (Some(n), None) => Ok(n),
            (None, Some(v)) => Ok(v),
            (None, None) => Err(Error::no_such_key(bucket, name)),
        }
    }

    /// Writes one object version, versioning-aware. Returns the row
    /// as stored, with the version slot resolved. A supplied
    /// multipart record is deleted in the same transaction.
    pub fn put_object(
        &self,
        mut object: Object,
        multipart: Option<&Multipart>,
        update_usage: bool,
    ) -> Result<Object> {
        let bucket = self.get_bucket(&object.bucket_name, false)?;
        object.null_version = bucket.versioning != VersioningState::Enabled;

        with_retry(|| {
            let mut txn = self.txn();
            let mut deltas: Vec<(StorageClass, i64)> = Vec::new();

            if object.null_version {
                let null_key = keys::object_key(&object.bucket_name, &object.name, None);
                if let Some(bytes) = txn.get(&null_key)? {
                    let old: Object = codec::decode(&bytes)?;
                    self.replace_version(&mut txn, &old)?;
                    if !old.delete_marker {
                        deltas.push((old.storage_class, -i64::try_from(old.size).unwrap_or(0)));
                    }
                }
            }
            txn.put(object.key(), codec::encode(&object)?);
            deltas.push((
                object.storage_class,
                i64::try_from(object.size).unwrap_or(0),
            ));

            if let Some(mp) = multipart {
                txn.delete(mp.key());
            }
            if update_usage {
                self.apply_usage_txn(&mut txn, &object.bucket_name, &deltas)?;
            }
            txn.commit()
        })?;

        self.invalidate_object(&object);
        self.invalidate_bucket(&object.bucket_name);
        Ok(object)
    }

    /// Appendable write into the null slot. The blob is appended in
    /// place, so nothing is enqueued for GC; when the object sits in
    /// the low-latency pool its hot-object mirror row is refreshed
    /// in the same transaction.
    pub fn append_object(&self, mut object: Object, mirror_hot: bool) -> Result<Object> {
        let bucket = self.get_bucket(&object.bucket_name, false)?;
        if bucket.versioning == VersioningState::Enabled {
            return Err(Error::InvalidVersioning(
                "append requires a non-versioned bucket".to_string(),
            ));
        }
        object.null_version = true;

        with_retry(|| {
            let mut txn = self.txn();
            let null_key = keys::object_key(&object.bucket_name, &object.name, None);
            let mut deltas: Vec<(StorageClass, i64)> = Vec::new();
            if let Some(bytes) = txn.get(&null_key)? {
                let old: Object = codec::decode(&bytes)?;
                if !old.delete_marker {
                    deltas.push((old.storage_class, -i64::try_from(old.size).unwrap_or(0)));
                }
            }
            deltas.push((
                object.storage_class,
                i64::try_from(object.size).unwrap_or(0),
            ));

            let encoded = codec::encode(&object)?;
            txn.put(null_key, encoded.clone());
            let hot_key = keys::hot_object_key(
                &object.bucket_name,
                &object.name,
                &object.version_component(),
            );
            if mirror_hot {
                txn.put(hot_key, encoded);
            } else {
                txn.delete(hot_key);
            }
            self.apply_usage_txn(&mut txn, &object.bucket_name, &deltas)?;
            txn.commit()
        })?;

        self.invalidate_object(&object);
        self.invalidate_bucket(&object.bucket_name);
        Ok(object)
    }

    /// Versioning-aware delete of the current version. Returns the
    /// delete marker when one was written.
    pub fn delete_object(&self, bucket_name: &str, name: &str) -> Result<Option<Object>> {
        let bucket = self.get_bucket(bucket_name, false)?;
        match bucket.versioning {
            VersioningState::Disabled => {
                let object = self.get_object(bucket_name, name, VersionRef::Null, false)?;
                self.remove_version(&object)?;
                Ok(None)
            }
            VersioningState::Enabled => {
                let marker = delete_marker(bucket_name, name, false);
                with_retry(|| {
                    let mut txn = self.txn();
                    txn.put(marker.key(), codec::encode(&marker)?);
                    self.apply_usage_txn(
                        &mut txn,
                        bucket_name,
                        &[(
                            marker.storage_class,
                            i64::try_from(marker.size).unwrap_or(0),
                        )],
                    )?;
                    txn.commit()
                })?;
                self.invalidate_bucket(bucket_name);
                Ok(Some(marker))
            }
            VersioningState::Suspended => {
                let marker = delete_marker(bucket_name, name, true);
                with_retry(|| {
                    let mut txn = self.txn();
                    let null_key = keys::object_key(bucket_name, name, None);
                    let mut deltas: Vec<(StorageClass, i64)> = Vec::new();
                    if let Some(bytes) = txn.get(&null_key)? {
                        // The null occupant is promoted to garbage.
                        let old: Object = codec::decode(&bytes)?;
                        self.replace_version(&mut txn, &old)?;
                        if !old.delete_marker {
                            deltas
                                .push((old.storage_class, -i64::try_from(old.size).unwrap_or(0)));
                        }
                    }
                    deltas.push((
                        marker.storage_class,
                        i64::try_from(marker.size).unwrap_or(0),
                    ));
                    txn.put(null_key, codec::encode(&marker)?);
                    self.apply_usage_txn(&mut txn, bucket_name, &deltas)?;
                    txn.commit()
                })?;
                self.invalidate_object(&marker);
                self.invalidate_bucket(bucket_name);
                Ok(Some(marker))
            }
        }
    }

    /// Physically removes one version, delete markers included.
    pub fn delete_object_version(
        &self,
        bucket_name: &str,
        name: &str,
        version: VersionRef,
    ) -> Result<()> {
        let object = self.get_object(bucket_name, name, version, false)?;
        self.remove_version(&object)
    }

    /// Renames the primary row and rewrites its part rows so the
    /// `(bucket, new_name, version)` prefix matches. `object` carries
    /// the new name.
    pub fn rename_object(&self, object: &Object, source_name: &str) -> Result<()> {
        let component = object.version_component();
        with_retry(|| {
            let mut txn = self.txn();
            let source_key = keys::object_key(
                &object.bucket_name,
                source_name,
                (!object.null_version).then_some(object.create_time_ns),
            );
            if txn.get(&source_key)?.is_none() {
                return Err(Error::no_such_key(&object.bucket_name, source_name));
            }
            txn.delete(source_key);
            txn.put(object.key(), codec::encode(object)?);

            let (start, end) = keys::parts_range(&object.bucket_name, source_name, &component);
            for (old_key, bytes) in txn.scan(&start, &end, 0)? {
                let parts = keys::split(&old_key);
                if let [_, _, _, _, part_no] = parts.as_slice() {
                    let new_key = {
                        let mut k = keys::parts_range(&object.bucket_name, &object.name, &component)
                            .0;
                        // Replace the low sentinel with the part
                        // number component.
                        k.pop();
                        k.extend_from_slice(part_no);
                        k
                    };
                    txn.put(new_key, bytes);
                }
                txn.delete(old_key);
            }
            txn.commit()
        })?;

        self.cache.remove(
            CacheTable::Object,
            &Self::object_cache_key(&object.bucket_name, source_name, &component),
        );
        self.invalidate_object(object);
        Ok(())
    }

    /// Narrow update of content type and custom attributes; no new
    /// version is created.
    pub fn update_object_attrs(&self, object: &Object) -> Result<()> {
        self.update_row_fields(object, |row, src| {
            row.content_type = src.content_type.clone();
            row.custom_attributes = src.custom_attributes.clone();
            row.storage_class = src.storage_class;
        })
    }

    /// Narrow update of the ACL.
    pub fn update_object_acl(&self, object: &Object) -> Result<()> {
        self.update_row_fields(object, |row, src| {
            row.acl = src.acl.clone();
        })
    }

    /// Rewrites `location`, `pool` and `object_id` after a migration
    /// copy and drops the hot-object mirror, atomically. The caller
    /// holds the per-object lock.
    pub fn migrate_object(&self, object: &Object) -> Result<()> {
        with_retry(|| {
            let mut txn = self.txn();
            txn.put(object.key(), codec::encode(object)?);
            txn.delete(keys::hot_object_key(
                &object.bucket_name,
                &object.name,
                &object.version_component(),
            ));
            txn.commit()
        })?;
        self.invalidate_object(object);
        Ok(())
    }

    /// Re-creates a hot-object mirror, used when a migration attempt
    /// failed after the scanner already dropped the row.
    pub fn put_hot_object(&self, object: &Object) -> Result<()> {
        let key = keys::hot_object_key(
            &object.bucket_name,
            &object.name,
            &object.version_component(),
        );
        self.put_row(&key, object)
    }

    /// Drops a hot-object mirror whose primary row has moved on.
    pub fn remove_hot_object(&self, object: &Object) -> Result<()> {
        self.store().delete(&keys::hot_object_key(
            &object.bucket_name,
            &object.name,
            &object.version_component(),
        ))
    }

    /// One batch of hot-object mirrors for the migration scanner.
    pub fn list_hot_objects(&self, limit: usize) -> Result<Vec<Object>> {
        let (start, end) = keys::hot_objects_range();
        let rows = self.store().scan(&start, &end, limit)?;
        rows.iter().map(|(_, v)| codec::decode(v)).collect()
    }

    /// Enqueues a garbage record outside an object transaction, for
    /// orphaned blobs after a partial backend failure.
    pub fn put_object_to_garbage(&self, record: &GarbageRecord) -> Result<()> {
        self.put_row(&record.key(), record)
    }

    // Internal helpers

    fn update_row_fields(
        &self,
        object: &Object,
        apply: impl Fn(&mut Object, &Object),
    ) -> Result<()> {
        with_retry(|| {
            let mut txn = self.txn();
            let key = object.key();
            let Some(bytes) = txn.get(&key)? else {
                return Err(Error::no_such_key(&object.bucket_name, &object.name));
            };
            let mut row: Object = codec::decode(&bytes)?;
            apply(&mut row, object);
            txn.put(key, codec::encode(&row)?);
            txn.commit()
        })?;
        self.invalidate_object(object);
        Ok(())
    }

    /// Stages the removal of a replaced version: its part rows, its
    /// hot-object mirror, and a garbage record for its blob.
    pub(crate) fn replace_version(&self, txn: &mut Txn<'_>, old: &Object) -> Result<()> {
        let component = old.version_component();
        let (start, end) = keys::parts_range(&old.bucket_name, &old.name, &component);
        for (key, _) in txn.scan(&start, &end, 0)? {
            txn.delete(key);
        }
        txn.delete(keys::hot_object_key(&old.bucket_name, &old.name, &component));
        if !old.delete_marker && (!old.object_id.is_empty() || !old.parts.is_empty()) {
            let record = GarbageRecord::from_object(old);
            txn.put(record.key(), codec::encode(&record)?);
            debug!(
                bucket = %old.bucket_name,
                object = %old.name,
                version = %component,
                "blob enqueued for garbage collection"
            );
        }
        Ok(())
    }

    /// Physically removes one version row with its dependents and
    /// books the usage delta.
    fn remove_version(&self, object: &Object) -> Result<()> {
        with_retry(|| {
            let mut txn = self.txn();
            self.replace_version(&mut txn, object)?;
            txn.delete(object.key());
            if !object.delete_marker || object.size > 0 {
                self.apply_usage_txn(
                    &mut txn,
                    &object.bucket_name,
                    &[(
                        object.storage_class,
                        -i64::try_from(object.size).unwrap_or(0),
                    )],
                )?;
            }
            txn.commit()
        })?;
        self.invalidate_object(object);
        self.invalidate_bucket(&object.bucket_name);
        Ok(())
    }

    /// Applies signed usage deltas to the bucket row inside the
    /// caller's transaction.
    pub(crate) fn apply_usage_txn(
        &self,
        txn: &mut Txn<'_>,
        bucket_name: &str,
        deltas: &[(StorageClass, i64)],
    ) -> Result<()> {
        if deltas.is_empty() {
            return Ok(());
        }
        let key = keys::bucket_key(bucket_name);
        let Some(bytes) = txn.get(&key)? else {
            return Err(Error::NoSuchBucket(bucket_name.to_string()));
        };
        let mut bucket: crate::types::Bucket = codec::decode(&bytes)?;
        for (class, delta) in deltas {
            bucket.apply_usage(*class, *delta);
        }
        txn.put(key, codec::encode(&bucket)?);
        Ok(())
    }
}

/// A fresh delete marker. Size is the name length, a sentinel that
/// books a bounded usage cost for markers.
fn delete_marker(bucket_name: &str, name: &str, null_version: bool) -> Object {
    let now = now_ns();
    Object {
        bucket_name: bucket_name.to_string(),
        name: name.to_string(),
        create_time_ns: now,
        last_modified_ns: now,
        null_version,
        delete_marker: true,
        size: name.len() as u64,
        ..Object::default()
    }
}
