//! The metadata cache
//!
//! Keyed by logical entity id within a table namespace. On miss the
//! supplied loader fetches from the authoritative store; the result
//! is written back only when the caller says it will be needed
//! again. Mutating paths call [`MetaCache::remove`] after commit.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use metagate_common::config::CacheMode;
use metagate_common::{Error, Result};

use crate::lru::LruCache;
use crate::remote::RemoteCache;

/// Cache namespaces, one per logical entity family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTable {
    Bucket,
    Object,
    User,
    Cluster,
}

impl CacheTable {
    fn prefix(self) -> &'static str {
        match self {
            Self::Bucket => "b",
            Self::Object => "o",
            Self::User => "u",
            Self::Cluster => "c",
        }
    }
}

/// Hit/miss counters, exposed for observability.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 { 0.0 } else { hits / total }
    }
}

/// Two-tier metadata cache.
pub struct MetaCache {
    mode: CacheMode,
    local: Option<LruCache>,
    remote: Option<Arc<dyn RemoteCache>>,
    stats: CacheStats,
}

impl MetaCache {
    #[must_use]
    pub fn new(
        mode: CacheMode,
        local_capacity: usize,
        remote: Option<Arc<dyn RemoteCache>>,
    ) -> Self {
        let local = match mode {
            CacheMode::Tiered => Some(LruCache::new(local_capacity)),
            CacheMode::Off | CacheMode::Simple => None,
        };
        let remote = match mode {
            CacheMode::Off => None,
            CacheMode::Simple | CacheMode::Tiered => remote,
        };
        Self {
            mode,
            local,
            remote,
            stats: CacheStats::default(),
        }
    }

    /// A cache that never caches.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(CacheMode::Off, 0, None)
    }

    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn full_key(table: CacheTable, key: &str) -> String {
        format!("{}:{}", table.prefix(), key)
    }

    /// Cache-aside read. `loader` hits the authoritative store on
    /// miss; `will_need` controls the write-back.
    pub fn get<T, F>(&self, table: CacheTable, key: &str, will_need: bool, loader: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<Option<T>>,
    {
        if self.mode == CacheMode::Off {
            return loader();
        }
        let full = Self::full_key(table, key);

        if let Some(local) = &self.local {
            if let Some(bytes) = local.get(&full) {
                match rmp_serde::from_slice(&bytes) {
                    Ok(value) => {
                        self.stats.hit();
                        return Ok(Some(value));
                    }
                    Err(e) => {
                        warn!(key = %full, error = %e, "dropping undecodable local cache entry");
                        local.remove(&full);
                    }
                }
            }
        }

        if let Some(remote) = &self.remote {
            match remote.get(&full) {
                Ok(Some(bytes)) => match rmp_serde::from_slice(&bytes) {
                    Ok(value) => {
                        self.stats.hit();
                        if let Some(local) = &self.local {
                            local.put(&full, bytes);
                        }
                        return Ok(Some(value));
                    }
                    Err(e) => {
                        warn!(key = %full, error = %e, "dropping undecodable remote cache entry");
                        let _ = remote.del(&full);
                    }
                },
                Ok(None) => {}
                Err(e) => warn!(key = %full, error = %e, "remote cache read failed"),
            }
        }

        self.stats.miss();
        let loaded = loader()?;
        if will_need && let Some(value) = &loaded {
            match rmp_serde::to_vec_named(value) {
                Ok(bytes) => {
                    if let Some(remote) = &self.remote
                        && let Err(e) = remote.set(&full, &bytes)
                    {
                        warn!(key = %full, error = %e, "remote cache write failed");
                    }
                    if let Some(local) = &self.local {
                        local.put(&full, bytes);
                    }
                }
                Err(e) => return Err(Error::Serialization(e.to_string())),
            }
        }
        Ok(loaded)
    }

    /// Invalidates both tiers. A remote failure is logged, not
    /// surfaced; the entry will age out by LRU pressure.
    pub fn remove(&self, table: CacheTable, key: &str) {
        if self.mode == CacheMode::Off {
            return;
        }
        let full = Self::full_key(table, key);
        if let Some(local) = &self.local {
            local.remove(&full);
        }
        if let Some(remote) = &self.remote
            && let Err(e) = remote.del(&full)
        {
            warn!(key = %full, error = %e, "remote cache invalidation failed");
        }
    }
}
