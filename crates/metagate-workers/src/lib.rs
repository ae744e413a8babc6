//! Metagate background workers
//!
//! Long-running tasks the gateway spawns next to the request
//! handlers: garbage collection of unreferenced blobs, hot-to-cold
//! migration of appendable objects, lifecycle expiration and
//! archival restore. Each worker exposes a `run` loop for
//! production and a single-pass entry point that the loop (and the
//! tests) drive.

mod gc;
mod lifecycle;
mod migration;
mod restore;

pub use gc::GcWorker;
pub use lifecycle::LifecycleWorker;
pub use migration::MigrationWorker;
pub use restore::RestoreWorker;

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use metagate_backend::{
        CAPACITY_POOL, Cluster, FAST_POOL, MemCluster, PoolPicker, WeightedCluster,
    };
    use metagate_cache::MetaCache;
    use metagate_kv::RedbStore;
    use metagate_meta::Meta;

    pub(crate) struct TestEnv {
        pub meta: Arc<Meta>,
        pub picker: Arc<PoolPicker>,
        pub fast: Arc<MemCluster>,
        pub cold: Arc<MemCluster>,
        _dir: tempfile::TempDir,
    }

    /// A metadata store over a fresh file plus one cluster per pool.
    pub(crate) fn test_env() -> TestEnv {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("meta.redb")).unwrap();
        let meta = Arc::new(Meta::new(Arc::new(store), MetaCache::disabled()));

        let fast = Arc::new(MemCluster::new("fast-1"));
        let cold = Arc::new(MemCluster::new("cold-1"));
        let mut clusters: HashMap<String, Arc<dyn Cluster>> = HashMap::new();
        clusters.insert("fast-1".to_string(), fast.clone());
        clusters.insert("cold-1".to_string(), cold.clone());
        let picker = Arc::new(PoolPicker::new(clusters, 85, Duration::from_secs(60)));
        picker.set_weights(HashMap::from([
            (
                FAST_POOL.to_string(),
                vec![WeightedCluster {
                    location: "fast-1".to_string(),
                    weight: 1,
                }],
            ),
            (
                CAPACITY_POOL.to_string(),
                vec![WeightedCluster {
                    location: "cold-1".to_string(),
                    weight: 1,
                }],
            ),
        ]));

        TestEnv {
            meta,
            picker,
            fast,
            cold,
            _dir: dir,
        }
    }
}
