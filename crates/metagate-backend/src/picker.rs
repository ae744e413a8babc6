//! Weighted pool selection
//!
//! New uploads pick a cluster by weighted random sampling among
//! clusters whose used-space percent sits below the configured
//! threshold. Usage probes are cached per cluster so placement never
//! hot-loops on the backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tracing::warn;

use metagate_common::{Error, Result};

use crate::cluster::Cluster;

/// One weighted placement candidate for a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedCluster {
    pub location: String,
    pub weight: u32,
}

struct CachedUsage {
    used_space_percent: u8,
    probed_at: Instant,
}

/// Chooses a cluster for a new blob in a given pool.
pub struct PoolPicker {
    clusters: HashMap<String, Arc<dyn Cluster>>,
    weights: Mutex<HashMap<String, Vec<WeightedCluster>>>,
    usage_cache: Mutex<HashMap<String, CachedUsage>>,
    max_used_space_percent: u8,
    usage_cache_ttl: Duration,
}

impl PoolPicker {
    #[must_use]
    pub fn new(
        clusters: HashMap<String, Arc<dyn Cluster>>,
        max_used_space_percent: u8,
        usage_cache_ttl: Duration,
    ) -> Self {
        Self {
            clusters,
            weights: Mutex::new(HashMap::new()),
            usage_cache: Mutex::new(HashMap::new()),
            max_used_space_percent,
            usage_cache_ttl,
        }
    }

    /// Full-table replacement of the weight map, from the cluster
    /// records in the metadata store.
    pub fn set_weights(&self, weights: HashMap<String, Vec<WeightedCluster>>) {
        *self.weights.lock() = weights;
    }

    /// Resolves a cluster by its id, for reads routed by `location`.
    #[must_use]
    pub fn cluster(&self, location: &str) -> Option<Arc<dyn Cluster>> {
        self.clusters.get(location).cloned()
    }

    /// All configured clusters, keyed by id.
    #[must_use]
    pub fn clusters(&self) -> &HashMap<String, Arc<dyn Cluster>> {
        &self.clusters
    }

    async fn used_space_percent(&self, cluster: &Arc<dyn Cluster>) -> u8 {
        {
            let cache = self.usage_cache.lock();
            if let Some(cached) = cache.get(cluster.id())
                && cached.probed_at.elapsed() < self.usage_cache_ttl
            {
                return cached.used_space_percent;
            }
        }
        let percent = match cluster.usage().await {
            Ok(usage) => usage.used_space_percent,
            Err(e) => {
                warn!(cluster = cluster.id(), error = %e, "usage probe failed");
                // An unprobeable cluster is treated as full.
                100
            }
        };
        self.usage_cache.lock().insert(
            cluster.id().to_string(),
            CachedUsage {
                used_space_percent: percent,
                probed_at: Instant::now(),
            },
        );
        percent
    }

    /// Picks a cluster for a new blob in `pool`. When every
    /// candidate is over the threshold, or the weight table has no
    /// entry for the pool, falls back to an arbitrary configured
    /// cluster and warns.
    pub async fn pick(&self, pool: &str) -> Result<Arc<dyn Cluster>> {
        let candidates = self.weights.lock().get(pool).cloned().unwrap_or_default();

        let mut eligible: Vec<WeightedCluster> = Vec::new();
        for candidate in candidates {
            let Some(cluster) = self.clusters.get(&candidate.location) else {
                warn!(location = %candidate.location, "weight entry names unknown cluster");
                continue;
            };
            if self.used_space_percent(cluster).await < self.max_used_space_percent {
                eligible.push(candidate);
            }
        }

        let total: u64 = eligible.iter().map(|c| u64::from(c.weight)).sum();
        if total > 0 {
            let mut roll = rand::thread_rng().gen_range(0..total);
            for candidate in &eligible {
                let w = u64::from(candidate.weight);
                if roll < w {
                    if let Some(cluster) = self.clusters.get(&candidate.location) {
                        return Ok(cluster.clone());
                    }
                }
                roll -= w;
            }
        }

        warn!(pool, "no eligible weighted cluster, falling back");
        self.clusters
            .values()
            .next()
            .cloned()
            .ok_or_else(|| Error::Configuration("no blob clusters configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemCluster;

    fn picker_with(percents: &[(&str, u8)]) -> (PoolPicker, Vec<Arc<MemCluster>>) {
        let mut clusters: HashMap<String, Arc<dyn Cluster>> = HashMap::new();
        let mut mems = Vec::new();
        let mut weights = Vec::new();
        for (id, pct) in percents {
            let mem = Arc::new(MemCluster::new(*id));
            mem.set_used_space_percent(*pct);
            clusters.insert((*id).to_string(), mem.clone());
            mems.push(mem);
            weights.push(WeightedCluster {
                location: (*id).to_string(),
                weight: 1,
            });
        }
        let picker = PoolPicker::new(clusters, 85, Duration::from_secs(24 * 3600));
        picker.set_weights(HashMap::from([("pool".to_string(), weights)]));
        (picker, mems)
    }

    #[tokio::test]
    async fn test_pick_avoids_full_clusters() {
        let (picker, _mems) = picker_with(&[("full", 90), ("ok", 10)]);
        for _ in 0..20 {
            let c = picker.pick("pool").await.unwrap();
            assert_eq!(c.id(), "ok");
        }
    }

    #[tokio::test]
    async fn test_pick_falls_back_when_all_full() {
        let (picker, _mems) = picker_with(&[("full", 95)]);
        let c = picker.pick("pool").await.unwrap();
        assert_eq!(c.id(), "full");
    }

    #[tokio::test]
    async fn test_pick_unknown_pool_falls_back() {
        let (picker, _mems) = picker_with(&[("a", 0)]);
        assert!(picker.pick("nope").await.is_ok());
    }

    #[tokio::test]
    async fn test_usage_probe_cached() {
        let (picker, mems) = picker_with(&[("a", 0)]);
        picker.pick("pool").await.unwrap();
        // The raised usage is invisible until the cache expires.
        mems[0].set_used_space_percent(99);
        let c = picker.pick("pool").await.unwrap();
        assert_eq!(c.id(), "a");
    }

    #[tokio::test]
    async fn test_no_clusters_is_configuration_error() {
        let picker = PoolPicker::new(HashMap::new(), 85, Duration::from_secs(1));
        assert!(picker.pick("pool").await.is_err());
    }
}
