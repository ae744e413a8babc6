//! Metagate Meta - the metadata core
//!
//! Translates S3 semantics (buckets, versioned objects, multipart
//! uploads, lifecycle, archival, quotas) into durable operations on
//! the transactional KV store: the key codec, the typed rows, the
//! object-version state machine and every metadata operation the
//! gateway and the background workers consume.

pub mod keys;
pub mod types;

mod meta;

pub use meta::{ListResult, Meta, MultipartListResult, VersionRef, VersionedListResult};
