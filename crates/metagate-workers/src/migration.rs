//! Hot-to-cold migration
//!
//! Appendable objects land in the low-latency pool and leave a
//! hot-object mirror row behind. Once an object has cooled down, the
//! scanner dispatches it over a bounded queue to a worker that
//! copies the blob into the capacity pool and rewrites its placement
//! under the per-object lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, warn};

use metagate_backend::{CAPACITY_POOL, FAST_POOL, PoolPicker};
use metagate_common::{Error, MigrationConfig, Result, now_ns};
use metagate_lock::{LockService, object_lock_key};
use metagate_meta::types::{GarbageRecord, Object};
use metagate_meta::{Meta, VersionRef};

pub struct MigrationWorker {
    meta: Arc<Meta>,
    picker: Arc<PoolPicker>,
    locks: Arc<LockService>,
    config: MigrationConfig,
}

impl MigrationWorker {
    #[must_use]
    pub fn new(
        meta: Arc<Meta>,
        picker: Arc<PoolPicker>,
        locks: Arc<LockService>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            meta,
            picker,
            locks,
            config,
        }
    }

    /// Spawns the worker pool and drives the scanner until aborted.
    pub async fn run(self: Arc<Self>) {
        let (tx, rx) = mpsc::channel::<Object>(self.config.queue_length.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for _ in 0..self.config.mg_thread.max(1) {
            let worker = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let entry = rx.lock().await.recv().await;
                    let Some(object) = entry else { break };
                    worker.handle(&object).await;
                }
            });
        }

        let mut ticker = interval(Duration::from_secs(self.config.mg_scan_interval_seconds));
        loop {
            ticker.tick().await;
            if let Err(error) = self.scan_once(&tx).await {
                warn!(%error, "migration scan failed");
            }
        }
    }

    /// One scanner pass: dispatch every cooled hot object and drop
    /// its mirror row. Send backpressures on the bounded queue.
    pub async fn scan_once(&self, tx: &mpsc::Sender<Object>) -> Result<usize> {
        let cooldown_ns = self
            .config
            .mg_object_cooldown_seconds
            .saturating_mul(1_000_000_000);
        let now = now_ns();
        let mut dispatched = 0;
        for object in self.meta.list_hot_objects(0)? {
            if object.last_modified_ns.saturating_add(cooldown_ns) > now {
                continue;
            }
            if tx.send(object.clone()).await.is_err() {
                return Err(Error::internal("migration queue closed"));
            }
            // A failed copy restores the mirror and the next append
            // re-creates it, so dropping it here cannot lose a hot
            // object.
            self.meta.remove_hot_object(&object)?;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Runs one dispatched entry and, on failure, puts the mirror
    /// row back so the next scan retries the object. The scanner
    /// drops the mirror at dispatch time, so without the restore a
    /// failed copy would strand the object in the fast pool.
    pub async fn handle(&self, entry: &Object) {
        let Err(error) = self.process(entry).await else {
            return;
        };
        warn!(
            bucket = %entry.bucket_name,
            object = %entry.name,
            %error,
            "migration failed, will retry on a later scan"
        );
        if let Err(error) = self.meta.put_hot_object(entry) {
            warn!(
                bucket = %entry.bucket_name,
                object = %entry.name,
                %error,
                "could not restore hot-object mirror"
            );
        }
    }

    /// Migrates one dispatched entry. Re-reads the row under the
    /// per-object lock; every skip condition leaves the object
    /// untouched, so replays are safe.
    pub async fn process(&self, entry: &Object) -> Result<()> {
        let key = object_lock_key(
            &entry.bucket_name,
            &entry.name,
            &entry.version_component(),
        );
        let _guard = self.locks.obtain(&key).await?;

        let version = if entry.null_version {
            VersionRef::Null
        } else {
            VersionRef::Time(entry.create_time_ns)
        };
        let current = match self
            .meta
            .get_object(&entry.bucket_name, &entry.name, version, false)
        {
            Ok(object) => object,
            Err(error) if error.is_not_found() => return Ok(()),
            Err(error) => return Err(error),
        };
        let cooldown_ns = self
            .config
            .mg_object_cooldown_seconds
            .saturating_mul(1_000_000_000);
        if current.pool != FAST_POOL
            || current.storage_class.is_archival()
            || current.last_modified_ns != entry.last_modified_ns
            || current.last_modified_ns.saturating_add(cooldown_ns) > now_ns()
        {
            return Ok(());
        }

        let Some(source) = self.picker.cluster(&current.location) else {
            return Err(Error::backend(format!(
                "unknown cluster {}",
                current.location
            )));
        };
        let reader = source
            .get(&current.pool, &current.object_id, 0, current.size)
            .await?;
        let dest = self.picker.pick(CAPACITY_POOL).await?;
        let (new_id, written) = dest.append(CAPACITY_POOL, None, reader, 0).await?;
        if written != current.size {
            // Partial copy: drop the destination blob and let a
            // later scan retry from scratch.
            dest.remove(CAPACITY_POOL, &new_id).await?;
            return Err(Error::backend(format!(
                "short migration copy: {written} of {} bytes",
                current.size
            )));
        }

        let mut migrated = current.clone();
        migrated.pool = CAPACITY_POOL.to_string();
        migrated.location = dest.id().to_string();
        migrated.object_id = new_id;
        self.meta.migrate_object(&migrated)?;

        // The source blob is no longer referenced. Removal failures
        // are deferred to GC rather than undoing the migration.
        if let Err(error) = source.remove(&current.pool, &current.object_id).await {
            warn!(
                object_id = %current.object_id,
                %error,
                "source blob removal failed, enqueueing for gc"
            );
            self.meta.put_object_to_garbage(&GarbageRecord::from_object(&current))?;
        }
        debug!(
            bucket = %migrated.bucket_name,
            object = %migrated.name,
            from = %current.location,
            to = %migrated.location,
            "object migrated to capacity pool"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_env;
    use metagate_backend::{Cluster, read_all};
    use metagate_common::{ObjectType, StorageClass, VersioningState};
    use metagate_meta::types::Bucket;

    fn config(cooldown_seconds: u64) -> MigrationConfig {
        MigrationConfig {
            mg_object_cooldown_seconds: cooldown_seconds,
            ..MigrationConfig::default()
        }
    }

    async fn hot_object(env: &crate::testutil::TestEnv, body: &[u8]) -> Object {
        env.meta
            .create_bucket(&Bucket {
                name: "hot".to_string(),
                owner_id: "u1".to_string(),
                created_at_ns: now_ns(),
                versioning: VersioningState::Disabled,
                ..Bucket::default()
            })
            .unwrap();
        let (object_id, size) = env
            .fast
            .append(
                FAST_POOL,
                None,
                Box::new(std::io::Cursor::new(body.to_vec())),
                0,
            )
            .await
            .unwrap();
        let now = now_ns();
        let object = Object {
            bucket_name: "hot".to_string(),
            name: "k".to_string(),
            create_time_ns: now,
            last_modified_ns: now,
            location: "fast-1".to_string(),
            pool: FAST_POOL.to_string(),
            owner_id: "u1".to_string(),
            size,
            object_id,
            object_type: ObjectType::Appendable,
            ..Object::default()
        };
        env.meta.append_object(object, true).unwrap()
    }

    #[tokio::test]
    async fn test_migration_preserves_content() {
        let env = test_env();
        let body = b"twelve bytes";
        let stored = hot_object(&env, body).await;

        let worker = MigrationWorker::new(
            env.meta.clone(),
            env.picker.clone(),
            LockService::new(Duration::from_secs(5)),
            config(0),
        );
        let (tx, mut rx) = mpsc::channel(10);
        assert_eq!(worker.scan_once(&tx).await.unwrap(), 1);
        assert!(env.meta.list_hot_objects(10).unwrap().is_empty());

        let entry = rx.recv().await.unwrap();
        worker.process(&entry).await.unwrap();

        let row = env
            .meta
            .get_object("hot", "k", VersionRef::Null, false)
            .unwrap();
        assert_eq!(row.pool, CAPACITY_POOL);
        assert_eq!(row.location, "cold-1");
        assert_ne!(row.object_id, stored.object_id);

        let reader = env
            .cold
            .get(CAPACITY_POOL, &row.object_id, 0, row.size)
            .await
            .unwrap();
        assert_eq!(read_all(reader).await.unwrap(), body);
        // The source blob is gone.
        assert!(!env.fast.contains(FAST_POOL, &stored.object_id));
    }

    #[tokio::test]
    async fn test_failed_migration_is_retried_on_next_scan() {
        let env = test_env();
        let stored = hot_object(&env, b"stuck bytes").await;

        // The row points at a cluster the picker does not know, so
        // the copy fails after the scanner has dropped the mirror.
        let mut ghost = stored.clone();
        ghost.location = "ghost".to_string();
        env.meta.append_object(ghost, true).unwrap();

        let worker = MigrationWorker::new(
            env.meta.clone(),
            env.picker.clone(),
            LockService::new(Duration::from_secs(5)),
            config(0),
        );
        let (tx, mut rx) = mpsc::channel(10);
        assert_eq!(worker.scan_once(&tx).await.unwrap(), 1);
        assert!(env.meta.list_hot_objects(10).unwrap().is_empty());

        let entry = rx.recv().await.unwrap();
        worker.handle(&entry).await;

        // The mirror came back, and the next pass dispatches again.
        assert_eq!(env.meta.list_hot_objects(10).unwrap().len(), 1);
        assert_eq!(worker.scan_once(&tx).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_defers_dispatch() {
        let env = test_env();
        hot_object(&env, b"fresh").await;

        let worker = MigrationWorker::new(
            env.meta.clone(),
            env.picker.clone(),
            LockService::new(Duration::from_secs(5)),
            config(3600),
        );
        let (tx, _rx) = mpsc::channel(10);
        assert_eq!(worker.scan_once(&tx).await.unwrap(), 0);
        // The mirror row survives for the next scan.
        assert_eq!(env.meta.list_hot_objects(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_modified_object_is_skipped() {
        let env = test_env();
        let stored = hot_object(&env, b"old bytes").await;

        // The object was appended to after dispatch.
        let mut newer = stored.clone();
        newer.last_modified_ns = now_ns();
        newer.size += 4;
        env.meta.append_object(newer, true).unwrap();

        let worker = MigrationWorker::new(
            env.meta.clone(),
            env.picker.clone(),
            LockService::new(Duration::from_secs(5)),
            config(0),
        );
        worker.process(&stored).await.unwrap();

        let row = env
            .meta
            .get_object("hot", "k", VersionRef::Null, false)
            .unwrap();
        assert_eq!(row.pool, FAST_POOL);
    }

    #[tokio::test]
    async fn test_archived_object_is_skipped() {
        let env = test_env();
        let mut stored = hot_object(&env, b"cold storage").await;
        stored.storage_class = StorageClass::Glacier;
        env.meta.update_object_attrs(&stored).unwrap();

        let worker = MigrationWorker::new(
            env.meta.clone(),
            env.picker.clone(),
            LockService::new(Duration::from_secs(5)),
            config(0),
        );
        worker.process(&stored).await.unwrap();
        let row = env
            .meta
            .get_object("hot", "k", VersionRef::Null, false)
            .unwrap();
        assert_eq!(row.pool, FAST_POOL);
    }
}
