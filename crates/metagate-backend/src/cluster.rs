//! Cluster trait
//!
//! The uniform contract over every configured blob backend. A
//! backend reporting "not found" on remove is treated as success by
//! callers; the GC worker relies on that.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use metagate_common::{Error, Result};

/// Streaming blob reader handed across the backend boundary.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Usage probe result for one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterUsage {
    pub used_space_percent: u8,
    pub total_bytes: u64,
    pub used_bytes: u64,
}

/// An opaque blob backend.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Stable cluster id, persisted in object rows as `location`.
    fn id(&self) -> &str;

    /// Stores a fresh blob, returning its id and the byte count.
    async fn put(&self, pool: &str, reader: BlobReader) -> Result<(String, u64)>;

    /// Appends at `offset`. With no `object_id` a fresh blob is
    /// reserved. Writing at an already-written offset overwrites.
    async fn append(
        &self,
        pool: &str,
        object_id: Option<&str>,
        reader: BlobReader,
        offset: u64,
    ) -> Result<(String, u64)>;

    /// Reads `length` bytes starting at `offset`.
    async fn get(&self, pool: &str, object_id: &str, offset: u64, length: u64)
    -> Result<BlobReader>;

    /// Removes a blob. Removing an absent blob is success.
    async fn remove(&self, pool: &str, object_id: &str) -> Result<()>;

    /// Usage probe, for placement gating.
    async fn usage(&self) -> Result<ClusterUsage>;
}

/// Drains a blob reader into memory. Capped by the caller's size
/// bookkeeping; backends enforce per-object reservation limits.
pub async fn read_all(mut reader: BlobReader) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .await
        .map_err(|e| Error::backend(e.to_string()))?;
    Ok(buf)
}
