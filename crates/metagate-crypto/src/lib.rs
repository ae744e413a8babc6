//! Metagate Crypto - key derivation, sealing and id codecs
//!
//! Everything the metadata plane needs to keep per-object data keys
//! out of plaintext storage: object-key derivation, the persisted
//! sealed-key envelope, the canonical KMS context encoding, and the
//! reversible upload-id/version-id codecs.

pub mod context;
pub mod ids;
pub mod key;
pub mod kms;
mod xxtea;

pub use context::{Context, context_bytes};
pub use ids::{decode_upload_id, decode_version_id, encode_upload_id, encode_version_id};
pub use key::{
    INTERNAL_SEAL_ALGORITHM, SealedKey, derive_part_key, generate_object_key, seal_key, unseal_key,
};
pub use kms::{Kms, LocalKms};
