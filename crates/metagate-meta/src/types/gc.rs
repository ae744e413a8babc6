//! Garbage records

use serde::{Deserialize, Serialize};

use metagate_common::{ObjectType, now_ns};

use crate::keys;
use crate::types::{Object, Part};

/// Give up on a record after this many failed removal attempts.
pub const MAX_GC_TRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GcStatus {
    #[default]
    Pending,
    Deleting,
}

/// Tombstone instructing the GC worker to remove one or more backend
/// blobs. Owns nothing; carries enough to address the blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GarbageRecord {
    pub bucket_name: String,
    pub object_name: String,
    pub version: String,
    pub location: String,
    pub pool: String,
    pub object_id: String,
    pub parts: Vec<Part>,
    pub status: GcStatus,
    pub mtime_ns: u64,
    pub tried_times: u32,
    pub object_type: ObjectType,
}

impl GarbageRecord {
    /// Builds the tombstone for one unreferenced object version.
    #[must_use]
    pub fn from_object(object: &Object) -> Self {
        Self {
            bucket_name: object.bucket_name.clone(),
            object_name: object.name.clone(),
            version: object.version_component(),
            location: object.location.clone(),
            pool: object.pool.clone(),
            object_id: object.object_id.clone(),
            parts: object.parts.values().cloned().collect(),
            status: GcStatus::Pending,
            mtime_ns: now_ns(),
            tried_times: 0,
            object_type: object.object_type,
        }
    }

    /// Key id component. Multipart objects have no blob id of their
    /// own, so the row identity stands in. Part-only tombstones of
    /// one upload all share that identity, so the first blob id is
    /// appended to keep them from overwriting each other.
    fn id_component(&self) -> String {
        if !self.object_id.is_empty() {
            return self.object_id.clone();
        }
        let blob = self.parts.first().map_or("", |p| p.object_id.as_str());
        format!(
            "{}:{}:{}:{blob}",
            self.bucket_name, self.object_name, self.version
        )
    }

    #[must_use]
    pub fn key(&self) -> Vec<u8> {
        keys::gc_key(&self.pool, &self.location, &self.id_component())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_from_object_carries_parts() {
        let mut parts = BTreeMap::new();
        parts.insert(
            1,
            Part {
                part_number: 1,
                size: 10,
                object_id: "blob-1".into(),
                ..Part::default()
            },
        );
        let object = Object {
            bucket_name: "bkt".into(),
            name: "obj".into(),
            location: "c1".into(),
            pool: "tiger".into(),
            parts,
            ..Object::default()
        };
        let record = GarbageRecord::from_object(&object);
        assert_eq!(record.parts.len(), 1);
        assert_eq!(record.status, GcStatus::Pending);
        assert_eq!(record.tried_times, 0);
    }

    #[test]
    fn test_keys_distinct_without_blob_id() {
        let a = GarbageRecord {
            bucket_name: "bkt".into(),
            object_name: "x".into(),
            version: "0".into(),
            pool: "tiger".into(),
            location: "c1".into(),
            ..GarbageRecord::default()
        };
        let mut b = a.clone();
        b.object_name = "y".into();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_part_tombstones_of_one_upload_keep_distinct_keys() {
        let staged = |blob: &str| GarbageRecord {
            bucket_name: "bkt".into(),
            object_name: "big".into(),
            version: "00000000000000abcdef".into(),
            pool: "tiger".into(),
            location: "c1".into(),
            parts: vec![Part {
                part_number: 1,
                size: 10,
                object_id: blob.into(),
                ..Part::default()
            }],
            ..GarbageRecord::default()
        };
        assert_ne!(staged("blob-1").key(), staged("blob-2").key());
    }
}
