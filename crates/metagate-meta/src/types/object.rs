//! Object and part rows

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use metagate_common::{
    Acl, NULL_VERSION_EXTERNAL, NULL_VERSION_INTERNAL, ObjectType, SseType, StorageClass,
};
use metagate_crypto::encode_version_id;

use crate::keys;

/// One object version. The `(bucket_name, name, version)` triple
/// identifies the row; the version is derived from `create_time_ns`
/// unless this is the null version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Object {
    pub bucket_name: String,
    pub name: String,
    pub create_time_ns: u64,
    pub null_version: bool,
    pub delete_marker: bool,

    /// Backend cluster id holding the blob
    pub location: String,
    pub pool: String,
    pub owner_id: String,
    pub size: u64,
    /// Opaque blob id inside the backend; empty for delete markers
    /// and completed multiparts (whose parts carry their own ids)
    pub object_id: String,
    pub last_modified_ns: u64,
    pub etag: String,
    pub content_type: String,
    pub custom_attributes: BTreeMap<String, String>,
    pub acl: Acl,

    pub sse_type: SseType,
    /// Encoded sealed-key envelope; empty when unencrypted
    pub sealed_key: Vec<u8>,
    /// 16 bytes, only the first 12 feed GCM
    pub iv: Vec<u8>,

    pub object_type: ObjectType,
    pub storage_class: StorageClass,

    /// Multipart objects only
    pub parts: BTreeMap<u32, Part>,
    /// Ascending byte offsets of the parts above
    pub parts_index: Vec<u64>,
}

impl Object {
    #[must_use]
    pub fn key(&self) -> Vec<u8> {
        keys::object_key(
            &self.bucket_name,
            &self.name,
            (!self.null_version).then_some(self.create_time_ns),
        )
    }

    /// Version component used in part, hot-object and freezer keys.
    #[must_use]
    pub fn version_component(&self) -> String {
        if self.null_version {
            NULL_VERSION_INTERNAL.to_string()
        } else {
            keys::version_component(self.create_time_ns)
        }
    }

    /// Version id reported to clients.
    #[must_use]
    pub fn external_version_id(&self) -> String {
        if self.null_version {
            NULL_VERSION_EXTERNAL.to_string()
        } else {
            encode_version_id(self.create_time_ns)
        }
    }

    /// Whether the multipart bookkeeping is internally consistent:
    /// offsets ascend and sizes sum to the object size.
    #[must_use]
    pub fn parts_consistent(&self) -> bool {
        if self.parts.is_empty() {
            return true;
        }
        let mut offset = 0u64;
        for (expected_offset, part) in self.parts_index.iter().zip(self.parts.values()) {
            if *expected_offset != offset || part.offset != offset {
                return false;
            }
            offset += part.size;
        }
        self.parts.len() == self.parts_index.len() && offset == self.size
    }
}

/// One contiguous byte range of a multipart object, stored as its
/// own backend blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Part {
    pub part_number: u32,
    pub size: u64,
    pub object_id: String,
    /// Byte offset inside the assembled object
    pub offset: u64,
    pub etag: String,
    pub last_modified_ns: u64,
    pub iv: Vec<u8>,
}
