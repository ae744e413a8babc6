//! Multipart upload lifecycle
//!
//! An in-flight upload is one staging row plus one row per uploaded
//! part, keyed under the upload component. Completion assembles the
//! final object and rekeys the chosen part rows to its version
//! component, all in one transaction, so an upload is never half
//! promoted.

use md5::{Digest, Md5};

use metagate_common::{
    Error, MIN_PART_SIZE, ObjectType, Result, VersioningState, now_ns,
};
use metagate_crypto::decode_upload_id;
use metagate_kv::{codec, with_retry};
use tracing::debug;

use crate::keys;
use crate::types::{GarbageRecord, Multipart, Object, Part};

use super::Meta;

/// A page of in-flight uploads.
#[derive(Debug, Clone, Default)]
pub struct MultipartListResult {
    pub uploads: Vec<Multipart>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
}

impl Meta {
    /// Registers a new upload. Two initiations in the same
    /// nanosecond get distinct ids by bumping the initial time.
    pub fn create_multipart(&self, mut multipart: Multipart) -> Result<Multipart> {
        self.get_bucket(&multipart.bucket_name, false)?;
        with_retry(|| {
            let mut txn = self.txn();
            while txn.get(&multipart.key())?.is_some() {
                multipart.initial_time_ns += 1;
            }
            txn.put(multipart.key(), codec::encode(&multipart)?);
            txn.commit()
        })?;
        debug!(
            bucket = %multipart.bucket_name,
            object = %multipart.object_name,
            upload_id = %multipart.upload_id(),
            "multipart upload created"
        );
        Ok(multipart)
    }

    pub fn get_multipart(&self, bucket: &str, object: &str, upload_id: &str) -> Result<Multipart> {
        let initial_time_ns = decode_upload_id(upload_id)?;
        self.load(&keys::multipart_key(bucket, object, initial_time_ns))?
            .ok_or_else(|| Error::NoSuchUpload {
                upload_id: upload_id.to_string(),
            })
    }

    /// Stages one part row. Re-uploading a part number replaces the
    /// row and sends the previous blob to GC.
    pub fn upload_part(&self, multipart: &Multipart, part: &Part) -> Result<()> {
        let component = keys::upload_component(multipart.initial_time_ns);
        let key = keys::part_key(
            &multipart.bucket_name,
            &multipart.object_name,
            &component,
            part.part_number,
        );
        with_retry(|| {
            let mut txn = self.txn();
            if txn.get(&multipart.key())?.is_none() {
                return Err(Error::NoSuchUpload {
                    upload_id: multipart.upload_id(),
                });
            }
            if let Some(bytes) = txn.get(&key)? {
                let old: Part = codec::decode(&bytes)?;
                let record = staged_garbage(multipart, vec![old]);
                txn.put(record.key(), codec::encode(&record)?);
            }
            txn.put(key.clone(), codec::encode(part)?);
            txn.commit()
        })
    }

    /// Staged parts in ascending part-number order, resuming after
    /// `part_marker`.
    pub fn list_parts(
        &self,
        multipart: &Multipart,
        part_marker: u32,
        limit: usize,
    ) -> Result<(Vec<Part>, bool)> {
        let component = keys::upload_component(multipart.initial_time_ns);
        let (range_start, end) = keys::parts_range(
            &multipart.bucket_name,
            &multipart.object_name,
            &component,
        );
        let start = if part_marker == 0 {
            range_start
        } else {
            let mut k = keys::part_key(
                &multipart.bucket_name,
                &multipart.object_name,
                &component,
                part_marker,
            );
            k.push(0x00);
            k
        };
        let fetch = if limit == 0 { 0 } else { limit + 1 };
        let rows = self.store().scan(&start, &end, fetch)?;
        let truncated = limit != 0 && rows.len() > limit;
        rows.iter()
            .take(if limit == 0 { rows.len() } else { limit })
            .map(|(_, v)| codec::decode(v))
            .collect::<Result<Vec<Part>>>()
            .map(|parts| (parts, truncated))
    }

    /// Promotes an upload to an object. `requested` is the client's
    /// `(part_number, etag)` manifest; it must be strictly ascending
    /// and match the staged rows, and every part but the last must
    /// reach the minimum size. Unreferenced staged parts go to GC.
    pub fn complete_multipart(
        &self,
        multipart: &Multipart,
        requested: &[(u32, String)],
    ) -> Result<Object> {
        if requested.is_empty() {
            return Err(Error::InvalidPart { part_number: 0 });
        }
        let bucket = self.get_bucket(&multipart.bucket_name, false)?;
        let (staged, _) = self.list_parts(multipart, 0, 0)?;

        let mut selected: Vec<Part> = Vec::with_capacity(requested.len());
        let mut leftovers: Vec<Part> = Vec::new();
        let mut cursor = staged.into_iter().peekable();
        let mut previous_number = 0u32;
        for (i, (part_number, etag)) in requested.iter().enumerate() {
            if *part_number <= previous_number {
                return Err(Error::InvalidPartOrder);
            }
            previous_number = *part_number;
            // Staged rows are ascending; everything skipped over was
            // uploaded but not referenced.
            let mut found = None;
            while cursor.peek().is_some_and(|p| p.part_number <= *part_number) {
                if let Some(part) = cursor.next() {
                    if part.part_number == *part_number {
                        found = Some(part);
                    } else {
                        leftovers.push(part);
                    }
                }
            }
            let Some(part) = found else {
                return Err(Error::InvalidPart {
                    part_number: *part_number,
                });
            };
            if part.etag.trim_matches('"') != etag.trim_matches('"') {
                return Err(Error::InvalidPart {
                    part_number: *part_number,
                });
            }
            let last = i == requested.len() - 1;
            if !last && part.size < MIN_PART_SIZE {
                return Err(Error::PartTooSmall {
                    part_number: *part_number,
                    size: part.size,
                    min: MIN_PART_SIZE,
                });
            }
            selected.push(part);
        }
        leftovers.extend(cursor);

        let object = assemble_object(multipart, &selected, bucket.versioning)?;
        let upload_component = keys::upload_component(multipart.initial_time_ns);
        let final_component = object.version_component();

        with_retry(|| {
            let mut txn = self.txn();
            if txn.get(&multipart.key())?.is_none() {
                return Err(Error::NoSuchUpload {
                    upload_id: multipart.upload_id(),
                });
            }
            let mut deltas = Vec::new();
            if object.null_version {
                let null_key =
                    keys::object_key(&object.bucket_name, &object.name, None);
                if let Some(bytes) = txn.get(&null_key)? {
                    let old: Object = codec::decode(&bytes)?;
                    self.replace_version(&mut txn, &old)?;
                    if !old.delete_marker {
                        deltas.push((
                            old.storage_class,
                            -i64::try_from(old.size).unwrap_or(0),
                        ));
                    }
                }
            }
            deltas.push((
                object.storage_class,
                i64::try_from(object.size).unwrap_or(0),
            ));

            txn.put(object.key(), codec::encode(&object)?);
            for part in &selected {
                txn.delete(keys::part_key(
                    &object.bucket_name,
                    &object.name,
                    &upload_component,
                    part.part_number,
                ));
                txn.put(
                    keys::part_key(
                        &object.bucket_name,
                        &object.name,
                        &final_component,
                        part.part_number,
                    ),
                    codec::encode(part)?,
                );
            }
            for part in &leftovers {
                txn.delete(keys::part_key(
                    &object.bucket_name,
                    &object.name,
                    &upload_component,
                    part.part_number,
                ));
            }
            if !leftovers.is_empty() {
                let record = staged_garbage(multipart, leftovers.clone());
                txn.put(record.key(), codec::encode(&record)?);
            }
            txn.delete(multipart.key());
            self.apply_usage_txn(&mut txn, &object.bucket_name, &deltas)?;
            txn.commit()
        })?;

        self.invalidate_object(&object);
        self.invalidate_bucket(&object.bucket_name);
        Ok(object)
    }

    /// Drops the upload and sends every staged part to GC.
    pub fn abort_multipart(&self, multipart: &Multipart) -> Result<()> {
        let (staged, _) = self.list_parts(multipart, 0, 0)?;
        let upload_component = keys::upload_component(multipart.initial_time_ns);
        with_retry(|| {
            let mut txn = self.txn();
            if txn.get(&multipart.key())?.is_none() {
                return Err(Error::NoSuchUpload {
                    upload_id: multipart.upload_id(),
                });
            }
            txn.delete(multipart.key());
            for part in &staged {
                txn.delete(keys::part_key(
                    &multipart.bucket_name,
                    &multipart.object_name,
                    &upload_component,
                    part.part_number,
                ));
            }
            if !staged.is_empty() {
                let record = staged_garbage(multipart, staged.clone());
                txn.put(record.key(), codec::encode(&record)?);
            }
            txn.commit()
        })
    }

    /// In-flight uploads of a bucket in key order: names ascending,
    /// newest upload first within a name.
    pub fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        key_marker: &str,
        upload_id_marker: &str,
        max_uploads: usize,
    ) -> Result<MultipartListResult> {
        self.get_bucket(bucket, false)?;
        let budget = if max_uploads == 0 {
            usize::MAX
        } else {
            max_uploads
        };
        let (range_start, end) = keys::bucket_multiparts_range(bucket);
        let mut start = if key_marker.is_empty() {
            range_start
        } else if upload_id_marker.is_empty() {
            let mut k = keys::multipart_key(bucket, key_marker, 0);
            // Past every upload component of the marker name.
            k.truncate(k.len() - 16);
            k.push(0xFF);
            k
        } else {
            let mut k = keys::multipart_key(bucket, key_marker, decode_upload_id(upload_id_marker)?);
            k.push(0x00);
            k
        };

        let mut result = MultipartListResult::default();
        'pages: loop {
            let rows = self.store().scan(&start, &end, 1_000)?;
            let page_len = rows.len();
            for (key, bytes) in rows {
                start = key.clone();
                start.push(0x00);
                let upload: Multipart = codec::decode(&bytes)?;
                if !upload.object_name.starts_with(prefix) {
                    if upload.object_name.as_str() > prefix {
                        break 'pages;
                    }
                    continue;
                }
                if let Some(cp) = collapse(&upload.object_name, prefix, delimiter) {
                    if result.common_prefixes.last() == Some(&cp) {
                        continue;
                    }
                    if result.uploads.len() + result.common_prefixes.len() >= budget {
                        result.is_truncated = true;
                        break 'pages;
                    }
                    result.common_prefixes.push(cp);
                    continue;
                }
                if result.uploads.len() + result.common_prefixes.len() >= budget {
                    result.is_truncated = true;
                    break 'pages;
                }
                result.uploads.push(upload);
            }
            if page_len < 1_000 {
                break;
            }
        }
        if result.is_truncated {
            if let Some(last) = result.uploads.last() {
                result.next_key_marker = Some(last.object_name.clone());
                result.next_upload_id_marker = Some(last.upload_id());
            }
        }
        Ok(result)
    }
}

fn collapse(name: &str, prefix: &str, delimiter: &str) -> Option<String> {
    if delimiter.is_empty() {
        return None;
    }
    let rest = name.strip_prefix(prefix)?;
    let idx = rest.find(delimiter)?;
    Some(format!("{prefix}{}", &rest[..idx + delimiter.len()]))
}

/// Tombstone for staged parts that never made it into an object.
fn staged_garbage(multipart: &Multipart, parts: Vec<Part>) -> GarbageRecord {
    GarbageRecord {
        bucket_name: multipart.bucket_name.clone(),
        object_name: multipart.object_name.clone(),
        version: keys::upload_component(multipart.initial_time_ns),
        location: multipart.location.clone(),
        pool: multipart.pool.clone(),
        parts,
        mtime_ns: now_ns(),
        object_type: ObjectType::Multipart,
        ..GarbageRecord::default()
    }
}

/// Builds the final object row from the upload metadata and the
/// chosen parts. The etag is the S3 convention: the digest of the
/// concatenated part digests, suffixed with the part count.
fn assemble_object(
    multipart: &Multipart,
    selected: &[Part],
    versioning: VersioningState,
) -> Result<Object> {
    let mut hasher = Md5::new();
    let mut size = 0u64;
    let mut parts = std::collections::BTreeMap::new();
    let mut parts_index = Vec::with_capacity(selected.len());
    for part in selected {
        let digest = hex::decode(part.etag.trim_matches('"')).map_err(|_| Error::InvalidPart {
            part_number: part.part_number,
        })?;
        hasher.update(&digest);
        let mut part = part.clone();
        part.offset = size;
        parts_index.push(size);
        size += part.size;
        parts.insert(part.part_number, part);
    }
    let etag = format!("{:x}-{}", hasher.finalize(), selected.len());

    let now = now_ns();
    Ok(Object {
        bucket_name: multipart.bucket_name.clone(),
        name: multipart.object_name.clone(),
        create_time_ns: now,
        last_modified_ns: now,
        null_version: versioning != VersioningState::Enabled,
        delete_marker: false,
        location: multipart.location.clone(),
        pool: multipart.pool.clone(),
        owner_id: multipart.owner_id.clone(),
        size,
        object_id: String::new(),
        etag,
        content_type: multipart.content_type.clone(),
        custom_attributes: multipart.custom_attributes.clone(),
        acl: multipart.acl.clone(),
        sse_type: multipart.sse_type,
        sealed_key: multipart.sealed_key.clone(),
        iv: multipart.iv.clone(),
        object_type: ObjectType::Multipart,
        storage_class: multipart.storage_class,
        parts,
        parts_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::VersionRef;
    use crate::meta::object::tests::make_bucket;
    use crate::meta::tests::test_meta;

    fn upload(meta: &Meta, bucket: &str, object: &str) -> Multipart {
        meta.create_multipart(Multipart {
            bucket_name: bucket.to_string(),
            object_name: object.to_string(),
            initial_time_ns: now_ns(),
            owner_id: "u1".into(),
            initiator_id: "u1".into(),
            pool: "tiger".into(),
            location: "c1".into(),
            ..Multipart::default()
        })
        .unwrap()
    }

    fn part(number: u32, size: u64) -> Part {
        let etag = format!("{:x}", Md5::digest(number.to_be_bytes()));
        Part {
            part_number: number,
            size,
            object_id: format!("blob-{number}"),
            etag,
            last_modified_ns: now_ns(),
            ..Part::default()
        }
    }

    fn manifest(parts: &[&Part]) -> Vec<(u32, String)> {
        parts
            .iter()
            .map(|p| (p.part_number, p.etag.clone()))
            .collect()
    }

    #[test]
    fn test_complete_multipart_out_of_order_upload() {
        let (meta, _dir) = test_meta();
        make_bucket(&meta, "mybucket", metagate_common::VersioningState::Disabled);
        let mp = upload(&meta, "mybucket", "big");

        // Upload order does not matter, only the manifest order does.
        let (p1, p2, p3) = (
            part(1, MIN_PART_SIZE),
            part(2, MIN_PART_SIZE),
            part(3, 100),
        );
        for p in [&p1, &p3, &p2] {
            meta.upload_part(&mp, p).unwrap();
        }

        let object = meta
            .complete_multipart(&mp, &manifest(&[&p1, &p2, &p3]))
            .unwrap();
        assert_eq!(object.size, 2 * MIN_PART_SIZE + 100);
        assert_eq!(object.parts.len(), 3);
        assert!(object.parts_consistent());
        assert!(object.etag.ends_with("-3"));

        // Staging is gone.
        assert!(meta.get_multipart("mybucket", "big", &mp.upload_id()).is_err());
        let (staged, _) = meta.list_parts(&mp, 0, 0).unwrap();
        assert!(staged.is_empty());

        // The final row is readable and usage is booked.
        let row = meta
            .get_object("mybucket", "big", VersionRef::Null, false)
            .unwrap();
        assert_eq!(row.object_type, ObjectType::Multipart);
        assert_eq!(
            meta.get_bucket_usage("mybucket").unwrap().get("STANDARD"),
            Some(&i64::try_from(object.size).unwrap())
        );
    }

    #[test]
    fn test_each_replaced_part_is_queued_for_gc() {
        let (meta, _dir) = test_meta();
        make_bucket(&meta, "mybucket", metagate_common::VersioningState::Disabled);
        let mp = upload(&meta, "mybucket", "big");

        // Replace two different part numbers of the same upload;
        // neither tombstone may shadow the other.
        for n in [1, 2] {
            meta.upload_part(&mp, &part(n, MIN_PART_SIZE)).unwrap();
            let mut again = part(n, MIN_PART_SIZE);
            again.object_id = format!("blob-{n}-retry");
            meta.upload_part(&mp, &again).unwrap();
        }

        let mut replaced: Vec<String> = meta
            .scan_garbage(10)
            .unwrap()
            .iter()
            .flat_map(|r| r.parts.iter().map(|p| p.object_id.clone()))
            .collect();
        replaced.sort();
        assert_eq!(replaced, vec!["blob-1".to_string(), "blob-2".to_string()]);
    }

    #[test]
    fn test_complete_rejects_small_middle_part() {
        let (meta, _dir) = test_meta();
        make_bucket(&meta, "mybucket", metagate_common::VersioningState::Disabled);
        let mp = upload(&meta, "mybucket", "big");
        let (p1, p2) = (part(1, 100), part(2, 100));
        meta.upload_part(&mp, &p1).unwrap();
        meta.upload_part(&mp, &p2).unwrap();

        assert!(matches!(
            meta.complete_multipart(&mp, &manifest(&[&p1, &p2])),
            Err(Error::PartTooSmall { part_number: 1, .. })
        ));
        // The upload survives a failed completion.
        assert!(meta.get_multipart("mybucket", "big", &mp.upload_id()).is_ok());
    }

    #[test]
    fn test_complete_rejects_bad_manifest() {
        let (meta, _dir) = test_meta();
        make_bucket(&meta, "mybucket", metagate_common::VersioningState::Disabled);
        let mp = upload(&meta, "mybucket", "big");
        let (p1, p2) = (part(1, MIN_PART_SIZE), part(2, 100));
        meta.upload_part(&mp, &p1).unwrap();
        meta.upload_part(&mp, &p2).unwrap();

        assert!(matches!(
            meta.complete_multipart(&mp, &manifest(&[&p2, &p1])),
            Err(Error::InvalidPartOrder)
        ));
        let mut wrong = p1.clone();
        wrong.etag = "deadbeef".into();
        assert!(matches!(
            meta.complete_multipart(&mp, &manifest(&[&wrong, &p2])),
            Err(Error::InvalidPart { part_number: 1 })
        ));
        assert!(matches!(
            meta.complete_multipart(&mp, &[(3, "aa".into())]),
            Err(Error::InvalidPart { part_number: 3 })
        ));
    }

    #[test]
    fn test_unreferenced_parts_go_to_garbage() {
        let (meta, _dir) = test_meta();
        make_bucket(&meta, "mybucket", metagate_common::VersioningState::Disabled);
        let mp = upload(&meta, "mybucket", "big");
        let (p1, p2) = (part(1, MIN_PART_SIZE), part(2, 100));
        meta.upload_part(&mp, &p1).unwrap();
        meta.upload_part(&mp, &p2).unwrap();

        meta.complete_multipart(&mp, &manifest(&[&p1])).unwrap();
        let garbage = meta.scan_garbage(10).unwrap();
        assert_eq!(garbage.len(), 1);
        assert_eq!(garbage[0].parts.len(), 1);
        assert_eq!(garbage[0].parts[0].part_number, 2);
    }

    #[test]
    fn test_reupload_part_replaces_and_collects_old_blob() {
        let (meta, _dir) = test_meta();
        make_bucket(&meta, "mybucket", metagate_common::VersioningState::Disabled);
        let mp = upload(&meta, "mybucket", "big");
        let old = part(1, 100);
        meta.upload_part(&mp, &old).unwrap();
        let mut new = part(1, 200);
        new.object_id = "blob-1b".into();
        meta.upload_part(&mp, &new).unwrap();

        let (staged, _) = meta.list_parts(&mp, 0, 0).unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].size, 200);
        let garbage = meta.scan_garbage(10).unwrap();
        assert_eq!(garbage.len(), 1);
        assert_eq!(garbage[0].parts[0].object_id, "blob-1");
    }

    #[test]
    fn test_abort_multipart() {
        let (meta, _dir) = test_meta();
        make_bucket(&meta, "mybucket", metagate_common::VersioningState::Disabled);
        let mp = upload(&meta, "mybucket", "big");
        meta.upload_part(&mp, &part(1, 100)).unwrap();

        meta.abort_multipart(&mp).unwrap();
        assert!(meta.get_multipart("mybucket", "big", &mp.upload_id()).is_err());
        let (staged, _) = meta.list_parts(&mp, 0, 0).unwrap();
        assert!(staged.is_empty());
        assert_eq!(meta.scan_garbage(10).unwrap().len(), 1);

        assert!(matches!(
            meta.abort_multipart(&mp),
            Err(Error::NoSuchUpload { .. })
        ));
    }

    #[test]
    fn test_list_parts_pagination() {
        let (meta, _dir) = test_meta();
        make_bucket(&meta, "mybucket", metagate_common::VersioningState::Disabled);
        let mp = upload(&meta, "mybucket", "big");
        for n in 1..=5 {
            meta.upload_part(&mp, &part(n, 100)).unwrap();
        }
        let (page, truncated) = meta.list_parts(&mp, 0, 3).unwrap();
        assert_eq!(
            page.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(truncated);
        let (page, truncated) = meta.list_parts(&mp, 3, 3).unwrap();
        assert_eq!(
            page.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![4, 5]
        );
        assert!(!truncated);
    }

    #[test]
    fn test_list_multipart_uploads() {
        let (meta, _dir) = test_meta();
        make_bucket(&meta, "mybucket", metagate_common::VersioningState::Disabled);
        upload(&meta, "mybucket", "docs/a");
        upload(&meta, "mybucket", "docs/b");
        upload(&meta, "mybucket", "top");

        let page = meta
            .list_multipart_uploads("mybucket", "", "/", "", "", 10)
            .unwrap();
        assert_eq!(page.common_prefixes, vec!["docs/"]);
        assert_eq!(page.uploads.len(), 1);
        assert_eq!(page.uploads[0].object_name, "top");

        let page = meta
            .list_multipart_uploads("mybucket", "docs/", "", "", "", 1)
            .unwrap();
        assert_eq!(page.uploads.len(), 1);
        assert!(page.is_truncated);
        let page = meta
            .list_multipart_uploads(
                "mybucket",
                "docs/",
                "",
                &page.next_key_marker.unwrap(),
                &page.next_upload_id_marker.unwrap(),
                10,
            )
            .unwrap();
        assert_eq!(page.uploads.len(), 1);
        assert!(!page.is_truncated);
    }
}
