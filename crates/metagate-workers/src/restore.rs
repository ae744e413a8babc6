//! Archival restore worker
//!
//! Drives freezer rows through their lifecycle: a `Ready` request is
//! claimed with a status CAS, the archived blob is copied into a
//! normal-access pool, and the row flips to `Finished` with a fresh
//! TTL. Expired thawed copies are dropped and their blobs enqueued
//! for GC.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, warn};

use metagate_backend::{CAPACITY_POOL, PoolPicker};
use metagate_common::{Error, Result, RestoreConfig, now_ns};
use metagate_lock::{LockService, object_lock_key};
use metagate_meta::Meta;
use metagate_meta::types::{Freezer, FreezerStatus};

pub struct RestoreWorker {
    meta: Arc<Meta>,
    picker: Arc<PoolPicker>,
    locks: Arc<LockService>,
    config: RestoreConfig,
    debug_mode: bool,
}

impl RestoreWorker {
    #[must_use]
    pub fn new(
        meta: Arc<Meta>,
        picker: Arc<PoolPicker>,
        locks: Arc<LockService>,
        config: RestoreConfig,
        debug_mode: bool,
    ) -> Self {
        Self {
            meta,
            picker,
            locks,
            config,
            debug_mode,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(self.config.scan_interval_secs));
        loop {
            ticker.tick().await;
            if let Err(error) = self.run_once().await {
                warn!(%error, "restore pass failed");
            }
        }
    }

    /// One pass over every freezer row: start pending restores and
    /// reap expired thawed copies.
    pub async fn run_once(&self) -> Result<usize> {
        let mut restored = 0;
        for freezer in self.meta.scan_freezers(0)? {
            match freezer.status {
                FreezerStatus::Ready => match self.restore(&freezer).await {
                    Ok(true) => restored += 1,
                    Ok(false) => {}
                    Err(error) => warn!(
                        bucket = %freezer.bucket_name,
                        object = %freezer.object_name,
                        %error,
                        "restore failed"
                    ),
                },
                FreezerStatus::Restoring => {}
                FreezerStatus::Finished => {
                    if freezer.expired(now_ns(), self.debug_mode) {
                        debug!(
                            bucket = %freezer.bucket_name,
                            object = %freezer.object_name,
                            "thawed copy expired"
                        );
                        self.meta.delete_freezer(&freezer)?;
                    }
                }
            }
        }
        Ok(restored)
    }

    /// Claims and performs one restore. Returns `false` when another
    /// worker won the claim.
    async fn restore(&self, freezer: &Freezer) -> Result<bool> {
        let key = object_lock_key(
            &freezer.bucket_name,
            &freezer.object_name,
            &freezer.version,
        );
        let _guard = self.locks.obtain(&key).await?;

        let restoring = match self.meta.update_freezer_status(
            freezer,
            FreezerStatus::Ready,
            FreezerStatus::Restoring,
        ) {
            Ok(row) => row,
            Err(Error::InvalidStatus(_)) => return Ok(false),
            Err(error) => return Err(error),
        };

        match self.thaw(&restoring).await {
            Ok(finished) => {
                self.meta.update_freezer_status(
                    &finished,
                    FreezerStatus::Restoring,
                    FreezerStatus::Finished,
                )?;
                debug!(
                    bucket = %finished.bucket_name,
                    object = %finished.object_name,
                    days = finished.life_time_days,
                    "restore finished"
                );
                Ok(true)
            }
            Err(error) => {
                // Hand the row back for a later pass.
                self.meta.update_freezer_status(
                    &restoring,
                    FreezerStatus::Restoring,
                    FreezerStatus::Ready,
                )?;
                Err(error)
            }
        }
    }

    /// Copies the archived bytes into a normal-access pool and
    /// returns the row describing the thawed copy.
    async fn thaw(&self, freezer: &Freezer) -> Result<Freezer> {
        let Some(source) = self.picker.cluster(&freezer.location) else {
            return Err(Error::backend(format!(
                "unknown cluster {}",
                freezer.location
            )));
        };
        let dest = self.picker.pick(CAPACITY_POOL).await?;

        let (object_id, written) = if freezer.parts.is_empty() {
            let reader = source
                .get(&freezer.pool, &freezer.object_id, 0, freezer.size)
                .await?;
            dest.append(CAPACITY_POOL, None, reader, 0).await?
        } else {
            // Parts are re-assembled into one contiguous thawed blob.
            let mut object_id: Option<String> = None;
            let mut offset = 0u64;
            for part in freezer.parts.values() {
                let reader = source.get(&freezer.pool, &part.object_id, 0, part.size).await?;
                let (id, _) = dest
                    .append(CAPACITY_POOL, object_id.as_deref(), reader, offset)
                    .await?;
                offset += part.size;
                object_id = Some(id);
            }
            (
                object_id.ok_or_else(|| Error::internal("freezer row with empty parts map"))?,
                offset,
            )
        };
        if written != freezer.size {
            dest.remove(CAPACITY_POOL, &object_id).await?;
            return Err(Error::backend(format!(
                "short restore copy: {written} of {} bytes",
                freezer.size
            )));
        }

        let mut finished = freezer.clone();
        finished.location = dest.id().to_string();
        finished.pool = CAPACITY_POOL.to_string();
        finished.object_id = object_id;
        finished.parts.clear();
        Ok(finished)
    }
}
