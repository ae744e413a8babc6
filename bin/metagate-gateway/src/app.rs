//! Process wiring
//!
//! Builds every long-lived service from the configuration once at
//! startup and hands the bundle to the request handlers and the
//! background workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use metagate_backend::{
    CAPACITY_POOL, Cluster, FAST_POOL, MemCluster, PoolPicker, WeightedCluster,
};
use metagate_cache::{InMemoryRemoteCache, MetaCache, RemoteCache};
use metagate_common::config::CacheMode;
use metagate_common::{Config, Result};
use metagate_crypto::{Kms, LocalKms};
use metagate_kv::RedbStore;
use metagate_lock::LockService;
use metagate_meta::Meta;
use metagate_meta::types::ClusterRecord;
use metagate_qos::{QosProvider, RefillPool, Throttler, UserLimits};
use metagate_workers::{GcWorker, LifecycleWorker, MigrationWorker, RestoreWorker};

/// How long a per-object lock may be held before it is considered
/// abandoned.
const LOCK_TTL_SECS: u64 = 30;

/// Everything a request handler needs, built once at startup.
pub struct App {
    pub config: Config,
    pub meta: Arc<Meta>,
    pub picker: Arc<PoolPicker>,
    pub locks: Arc<LockService>,
    pub throttler: Arc<Throttler>,
    pub kms: Arc<dyn Kms>,
}

/// Adapts the metadata store to the throttler's poll interface.
struct MetaQosProvider {
    meta: Arc<Meta>,
}

impl QosProvider for MetaQosProvider {
    fn user_limits(&self) -> Result<Vec<UserLimits>> {
        Ok(self
            .meta
            .get_all_user_qos()?
            .into_iter()
            .map(|row| UserLimits {
                user_id: row.user_id,
                read_qps: row.read_qps,
                write_qps: row.write_qps,
                bandwidth_kbps: row.bandwidth_kbps,
            })
            .collect())
    }

    fn bucket_owners(&self) -> Result<Vec<(String, String)>> {
        self.meta.get_all_bucket_owners()
    }
}

impl App {
    pub fn bootstrap(config: Config) -> Result<Self> {
        let store = RedbStore::open(&config.meta.db_path)?;
        let remote: Option<Arc<dyn RemoteCache>> = match config.cache.meta_cache_type {
            CacheMode::Off => None,
            CacheMode::Simple | CacheMode::Tiered => Some(Arc::new(InMemoryRemoteCache::new())),
        };
        let cache = MetaCache::new(
            config.cache.meta_cache_type,
            config.cache.local_capacity,
            remote,
        );
        let meta = Arc::new(Meta::new(Arc::new(store), cache));

        let picker = Arc::new(build_picker(&meta, &config)?);
        let locks = LockService::new(Duration::from_secs(LOCK_TTL_SECS));
        let kms: Arc<dyn Kms> = Arc::new(LocalKms::from_hex(
            &config.kms.master_key_hex,
            config.kms.key_id.clone(),
        )?);

        let pool = Arc::new(RefillPool::new(
            config.qos.download_buf_pool_size,
            config.qos.upload_max_chunk_size,
        ));
        let defaults = UserLimits {
            user_id: String::new(),
            read_qps: config.qos.default_read_ops,
            write_qps: config.qos.default_write_ops,
            bandwidth_kbps: config.qos.default_bandwidth_kbps,
        };
        let throttler = Arc::new(Throttler::new(config.qos.enable_qos, defaults, pool));

        Ok(Self {
            config,
            meta,
            picker,
            locks,
            throttler,
            kms,
        })
    }

    /// Spawns the background workers and the QoS refresh loop. The
    /// returned handles are aborted on shutdown.
    pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        let gc = Arc::new(GcWorker::new(
            self.meta.clone(),
            self.picker.clone(),
            self.config.gc.clone(),
        ));
        for _ in 0..self.config.gc.gc_thread.max(1) {
            tasks.push(tokio::spawn(Arc::clone(&gc).run()));
        }

        let migration = Arc::new(MigrationWorker::new(
            self.meta.clone(),
            self.picker.clone(),
            self.locks.clone(),
            self.config.migration.clone(),
        ));
        tasks.push(tokio::spawn(migration.run()));

        let lifecycle = Arc::new(LifecycleWorker::new(
            self.meta.clone(),
            self.config.lifecycle.clone(),
            self.config.debug_mode,
        ));
        for _ in 0..self.config.lifecycle.lc_thread.max(1) {
            tasks.push(tokio::spawn(Arc::clone(&lifecycle).run()));
        }

        let restore = Arc::new(RestoreWorker::new(
            self.meta.clone(),
            self.picker.clone(),
            self.locks.clone(),
            self.config.restore.clone(),
            self.config.debug_mode,
        ));
        tasks.push(tokio::spawn(restore.run()));

        if self.config.qos.enable_qos {
            let provider: Arc<dyn QosProvider> = Arc::new(MetaQosProvider {
                meta: self.meta.clone(),
            });
            tasks.push(tokio::spawn(self.throttler.clone().run(
                provider,
                Duration::from_secs(self.config.qos.refresh_interval_secs),
            )));
        }

        info!(tasks = tasks.len(), "background workers spawned");
        tasks
    }
}

/// Builds the cluster picker from the weight records in the
/// metadata store. Only the in-memory cluster driver is wired in;
/// the `backend` field of a record selects the driver once more
/// land.
fn build_picker(meta: &Meta, config: &Config) -> Result<PoolPicker> {
    let mut records = meta.get_clusters()?;
    if records.is_empty() {
        // First boot on an empty store: seed one in-memory cluster
        // per pool so the process is usable out of the box.
        warn!("no cluster records found, seeding in-memory defaults");
        records = vec![
            ClusterRecord {
                pool: FAST_POOL.to_string(),
                fsid: "mem-fast".to_string(),
                backend: "memory".to_string(),
                weight: 1,
            },
            ClusterRecord {
                pool: CAPACITY_POOL.to_string(),
                fsid: "mem-cold".to_string(),
                backend: "memory".to_string(),
                weight: 1,
            },
        ];
        for record in &records {
            meta.put_cluster(record)?;
        }
    }

    let mut clusters: HashMap<String, Arc<dyn Cluster>> = HashMap::new();
    let mut weights: HashMap<String, Vec<WeightedCluster>> = HashMap::new();
    for record in records {
        clusters
            .entry(record.fsid.clone())
            .or_insert_with(|| Arc::new(MemCluster::new(&record.fsid)) as Arc<dyn Cluster>);
        weights.entry(record.pool).or_default().push(WeightedCluster {
            location: record.fsid,
            weight: record.weight,
        });
    }

    let picker = PoolPicker::new(
        clusters,
        config.backend.cluster_max_used_space_percent,
        Duration::from_secs(config.backend.usage_cache_secs),
    );
    picker.set_weights(weights);
    Ok(picker)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.meta.db_path = dir
            .path()
            .join("meta.redb")
            .to_string_lossy()
            .into_owned();
        config
    }

    #[test]
    fn test_bootstrap_seeds_default_clusters() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::bootstrap(test_config(&dir)).unwrap();

        let records = app.meta.get_clusters().unwrap();
        assert_eq!(records.len(), 2);
        assert!(app.picker.cluster("mem-fast").is_some());
        assert!(app.picker.cluster("mem-cold").is_some());
    }

    #[tokio::test]
    async fn test_workers_spawn_and_abort() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::bootstrap(test_config(&dir)).unwrap();
        let tasks = app.spawn_workers();
        assert!(!tasks.is_empty());
        for task in tasks {
            task.abort();
        }
    }
}
