//! Garbage collection worker
//!
//! Claims pending garbage records in batches, removes the backend
//! blobs they name, and drops the records. A record whose backend
//! keeps failing is retried a bounded number of times and then
//! abandoned, so one broken blob cannot wedge the whole queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, warn};

use metagate_backend::PoolPicker;
use metagate_common::{GcConfig, Result};
use metagate_meta::Meta;
use metagate_meta::types::GarbageRecord;

pub struct GcWorker {
    meta: Arc<Meta>,
    picker: Arc<PoolPicker>,
    config: GcConfig,
}

impl GcWorker {
    #[must_use]
    pub fn new(meta: Arc<Meta>, picker: Arc<PoolPicker>, config: GcConfig) -> Self {
        Self {
            meta,
            picker,
            config,
        }
    }

    /// Poll loop. Runs until the task is aborted.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(self.config.scan_interval_secs));
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(0) => {}
                Ok(collected) => debug!(collected, "gc pass finished"),
                Err(error) => warn!(%error, "gc pass failed"),
            }
        }
    }

    /// One pass: claim a batch and collect each record. Returns the
    /// number of records fully collected.
    pub async fn run_once(&self) -> Result<usize> {
        let stuck_reset_ns = self.config.stuck_reset_secs.saturating_mul(1_000_000_000);
        let claimed = self
            .meta
            .claim_garbage(self.config.batch_size, stuck_reset_ns)?;
        let mut collected = 0;
        for record in claimed {
            match self.collect(&record).await {
                Ok(()) => {
                    self.meta.delete_garbage(&record)?;
                    collected += 1;
                }
                Err(error) => {
                    warn!(
                        bucket = %record.bucket_name,
                        object = %record.object_name,
                        object_id = %record.object_id,
                        %error,
                        "blob removal failed"
                    );
                    self.meta.fail_garbage(&record)?;
                }
            }
        }
        Ok(collected)
    }

    /// Removes every blob the record names. Backends report removal
    /// of an absent blob as success, so replays are harmless.
    async fn collect(&self, record: &GarbageRecord) -> Result<()> {
        let Some(cluster) = self.picker.cluster(&record.location) else {
            return Err(metagate_common::Error::backend(format!(
                "unknown cluster {}",
                record.location
            )));
        };
        if record.parts.is_empty() {
            if !record.object_id.is_empty() {
                cluster.remove(&record.pool, &record.object_id).await?;
            }
            return Ok(());
        }
        for part in &record.parts {
            cluster.remove(&record.pool, &part.object_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_env;
    use metagate_backend::Cluster;
    use metagate_common::now_ns;
    use metagate_meta::types::Part;

    fn config() -> GcConfig {
        GcConfig {
            batch_size: 10,
            ..GcConfig::default()
        }
    }

    fn record(location: &str, object_id: &str) -> GarbageRecord {
        GarbageRecord {
            bucket_name: "bkt".into(),
            object_name: "obj".into(),
            version: "0".into(),
            pool: "tiger".into(),
            location: location.into(),
            object_id: object_id.into(),
            mtime_ns: now_ns(),
            ..GarbageRecord::default()
        }
    }

    #[tokio::test]
    async fn test_collects_blob_and_drops_record() {
        let env = test_env();
        let (object_id, _) = env
            .cold
            .append("tiger", None, Box::new(std::io::Cursor::new(vec![1u8; 8])), 0)
            .await
            .unwrap();
        assert!(env.cold.contains("tiger", &object_id));
        env.meta.put_garbage(&record("cold-1", &object_id)).unwrap();

        let worker = GcWorker::new(env.meta.clone(), env.picker.clone(), config());
        assert_eq!(worker.run_once().await.unwrap(), 1);
        assert!(!env.cold.contains("tiger", &object_id));
        assert!(env.meta.scan_garbage(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_absent_blob_counts_as_collected() {
        let env = test_env();
        env.meta.put_garbage(&record("cold-1", "never-written")).unwrap();
        let worker = GcWorker::new(env.meta.clone(), env.picker.clone(), config());
        assert_eq!(worker.run_once().await.unwrap(), 1);
        assert!(env.meta.scan_garbage(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gives_up_after_try_budget() {
        let env = test_env();
        env.cold.set_fail_removes(true);
        env.meta.put_garbage(&record("cold-1", "blob-a")).unwrap();

        let mut healthy = record("cold-1", "blob-b");
        healthy.location = "fast-1".into();
        healthy.pool = "rabbit".into();
        env.meta.put_garbage(&healthy).unwrap();

        let worker = GcWorker::new(
            env.meta.clone(),
            env.picker.clone(),
            GcConfig {
                batch_size: 10,
                stuck_reset_secs: 0,
                ..GcConfig::default()
            },
        );
        // Pass 1: healthy record collected, failing one retried.
        assert_eq!(worker.run_once().await.unwrap(), 1);
        assert_eq!(env.meta.scan_garbage(10).unwrap().len(), 1);
        // Two more failures exhaust the budget; the record is
        // abandoned rather than looping forever.
        assert_eq!(worker.run_once().await.unwrap(), 0);
        assert_eq!(worker.run_once().await.unwrap(), 0);
        assert!(env.meta.scan_garbage(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_removes_every_part() {
        let env = test_env();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (id, _) = env
                .cold
                .append("tiger", None, Box::new(std::io::Cursor::new(vec![2u8; 4])), 0)
                .await
                .unwrap();
            ids.push(id);
        }
        let mut rec = record("cold-1", "");
        rec.parts = ids
            .iter()
            .enumerate()
            .map(|(i, id)| Part {
                part_number: u32::try_from(i).unwrap() + 1,
                object_id: id.clone(),
                size: 4,
                ..Part::default()
            })
            .collect();
        env.meta.put_garbage(&rec).unwrap();

        let worker = GcWorker::new(env.meta.clone(), env.picker.clone(), config());
        assert_eq!(worker.run_once().await.unwrap(), 1);
        for id in &ids {
            assert!(!env.cold.contains("tiger", id));
        }
    }
}
