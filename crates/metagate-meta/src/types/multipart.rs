//! In-flight multipart upload rows

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use metagate_common::{Acl, SseType, StorageClass};
use metagate_crypto::encode_upload_id;

use crate::keys;

/// Staging record for a multipart upload, keyed by
/// `(bucket, object, initial_time_ns)`. Carries the metadata the
/// final object inherits; staged parts live as their own rows under
/// the upload component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Multipart {
    pub bucket_name: String,
    pub object_name: String,
    pub initial_time_ns: u64,

    pub owner_id: String,
    pub initiator_id: String,
    pub content_type: String,
    pub acl: Acl,
    pub sse_type: SseType,
    pub sealed_key: Vec<u8>,
    pub iv: Vec<u8>,
    pub storage_class: StorageClass,
    pub custom_attributes: BTreeMap<String, String>,
    pub pool: String,
    pub location: String,
}

impl Multipart {
    #[must_use]
    pub fn key(&self) -> Vec<u8> {
        keys::multipart_key(&self.bucket_name, &self.object_name, self.initial_time_ns)
    }

    /// The upload id visible to clients.
    #[must_use]
    pub fn upload_id(&self) -> String {
        encode_upload_id(self.initial_time_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metagate_crypto::decode_upload_id;

    #[test]
    fn test_upload_id_recovers_initial_time() {
        let multipart = Multipart {
            bucket_name: "bkt".into(),
            object_name: "obj".into(),
            initial_time_ns: 1_234_567,
            ..Multipart::default()
        };
        let id = multipart.upload_id();
        assert!(!id.is_empty());
        assert_eq!(decode_upload_id(&id).unwrap(), 1_234_567);
    }
}
