//! In-memory cluster
//!
//! Backs single-node deployments and the worker test suites. Supports
//! fault injection on `remove` and a configurable used-space percent
//! for exercising the pool picker.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use metagate_common::{Error, Result};

use crate::cluster::{BlobReader, Cluster, ClusterUsage, read_all};

/// Blob cluster held entirely in process memory.
pub struct MemCluster {
    id: String,
    blobs: DashMap<(String, String), Vec<u8>>,
    fail_removes: AtomicBool,
    used_space_percent: AtomicU8,
}

impl MemCluster {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            blobs: DashMap::new(),
            fail_removes: AtomicBool::new(false),
            used_space_percent: AtomicU8::new(0),
        }
    }

    /// Makes every subsequent `remove` fail, for GC retry tests.
    pub fn set_fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    pub fn set_used_space_percent(&self, percent: u8) {
        self.used_space_percent.store(percent, Ordering::SeqCst);
    }

    /// Whether the blob still exists, for test assertions.
    #[must_use]
    pub fn contains(&self, pool: &str, object_id: &str) -> bool {
        self.blobs
            .contains_key(&(pool.to_string(), object_id.to_string()))
    }

    fn used_bytes(&self) -> u64 {
        self.blobs.iter().map(|e| e.value().len() as u64).sum()
    }
}

#[async_trait]
impl Cluster for MemCluster {
    fn id(&self) -> &str {
        &self.id
    }

    async fn put(&self, pool: &str, reader: BlobReader) -> Result<(String, u64)> {
        let data = read_all(reader).await?;
        let object_id = Uuid::new_v4().to_string();
        let written = data.len() as u64;
        self.blobs
            .insert((pool.to_string(), object_id.clone()), data);
        Ok((object_id, written))
    }

    async fn append(
        &self,
        pool: &str,
        object_id: Option<&str>,
        reader: BlobReader,
        offset: u64,
    ) -> Result<(String, u64)> {
        let data = read_all(reader).await?;
        let written = data.len() as u64;
        let object_id = object_id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        let key = (pool.to_string(), object_id.clone());

        let mut entry = self.blobs.entry(key).or_default();
        let blob = entry.value_mut();
        let offset = usize::try_from(offset)
            .map_err(|_| Error::backend(format!("append offset {offset} out of range")))?;
        if blob.len() < offset {
            return Err(Error::backend(format!(
                "append at {offset} beyond blob end {}",
                blob.len()
            )));
        }
        blob.truncate(offset);
        blob.extend_from_slice(&data);
        Ok((object_id, written))
    }

    async fn get(
        &self,
        pool: &str,
        object_id: &str,
        offset: u64,
        length: u64,
    ) -> Result<BlobReader> {
        let key = (pool.to_string(), object_id.to_string());
        let blob = self
            .blobs
            .get(&key)
            .ok_or_else(|| Error::backend(format!("no such blob: {pool}/{object_id}")))?;
        let data = blob.value();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = usize::try_from(offset.saturating_add(length))
            .unwrap_or(usize::MAX)
            .min(data.len());
        Ok(Box::new(Cursor::new(data[start..end].to_vec())))
    }

    async fn remove(&self, pool: &str, object_id: &str) -> Result<()> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(Error::backend(format!(
                "injected remove failure: {pool}/{object_id}"
            )));
        }
        // Absent blob is success.
        self.blobs
            .remove(&(pool.to_string(), object_id.to_string()));
        Ok(())
    }

    async fn usage(&self) -> Result<ClusterUsage> {
        Ok(ClusterUsage {
            used_space_percent: self.used_space_percent.load(Ordering::SeqCst),
            total_bytes: 0,
            used_bytes: self.used_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(data: &[u8]) -> BlobReader {
        Box::new(Cursor::new(data.to_vec()))
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let cluster = MemCluster::new("c1");
        let (oid, n) = cluster.put("p", reader(b"hello")).await.unwrap();
        assert_eq!(n, 5);
        let bytes = read_all(cluster.get("p", &oid, 0, 5).await.unwrap())
            .await
            .unwrap();
        assert_eq!(bytes, b"hello");

        cluster.remove("p", &oid).await.unwrap();
        assert!(!cluster.contains("p", &oid));
        // Removing again still succeeds.
        cluster.remove("p", &oid).await.unwrap();
    }

    #[tokio::test]
    async fn test_append_overwrites_at_offset() {
        let cluster = MemCluster::new("c1");
        let (oid, _) = cluster.append("p", None, reader(b"AAA"), 0).await.unwrap();
        cluster
            .append("p", Some(&oid), reader(b"BB"), 3)
            .await
            .unwrap();
        // Same offset overwrites.
        cluster
            .append("p", Some(&oid), reader(b"CC"), 3)
            .await
            .unwrap();
        let bytes = read_all(cluster.get("p", &oid, 0, 5).await.unwrap())
            .await
            .unwrap();
        assert_eq!(bytes, b"AAACC");
    }

    #[tokio::test]
    async fn test_append_past_end_rejected() {
        let cluster = MemCluster::new("c1");
        let (oid, _) = cluster.append("p", None, reader(b"AAA"), 0).await.unwrap();
        assert!(
            cluster
                .append("p", Some(&oid), reader(b"X"), 10)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_ranged_get() {
        let cluster = MemCluster::new("c1");
        let (oid, _) = cluster.put("p", reader(b"0123456789")).await.unwrap();
        let bytes = read_all(cluster.get("p", &oid, 3, 4).await.unwrap())
            .await
            .unwrap();
        assert_eq!(bytes, b"3456");
    }

    #[tokio::test]
    async fn test_fail_removes() {
        let cluster = MemCluster::new("c1");
        let (oid, _) = cluster.put("p", reader(b"x")).await.unwrap();
        cluster.set_fail_removes(true);
        assert!(cluster.remove("p", &oid).await.is_err());
        cluster.set_fail_removes(false);
        cluster.remove("p", &oid).await.unwrap();
    }
}
