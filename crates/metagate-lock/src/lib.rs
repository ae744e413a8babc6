//! Metagate Lock - per-object advisory locks
//!
//! A cluster-wide advisory lock keyed by `{bucket}:{object}:{version}`.
//! Acquisition is a set-if-absent with expiry; the holder refreshes
//! the TTL from a background task at a third of the TTL interval, and
//! release deletes the key only while still owned. Required wherever
//! an existing version's `object_id` is rewritten: migration, restore
//! completion, in-place overwrite.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use metagate_common::{Error, Result};

/// Lock key for one object version. Null-versioned objects use the
/// internal sentinel, so they never collide with versioned siblings.
#[must_use]
pub fn object_lock_key(bucket: &str, object: &str, version: &str) -> String {
    format!("{bucket}:{object}:{version}")
}

struct Holder {
    owner: Uuid,
    expires_at: Instant,
}

/// Advisory lock table. One instance per process in the single-node
/// deployment; the contract matches an external lock service.
pub struct LockService {
    locks: DashMap<String, Holder>,
    ttl: Duration,
    max_attempts: u32,
}

impl LockService {
    #[must_use]
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            locks: DashMap::new(),
            ttl,
            max_attempts: 10,
        })
    }

    /// Set-if-absent with expiry. An expired holder is evicted.
    fn try_obtain(&self, key: &str, owner: Uuid) -> bool {
        let now = Instant::now();
        let mut entry = self.locks.entry(key.to_string()).or_insert_with(|| Holder {
            owner,
            expires_at: now + self.ttl,
        });
        if entry.owner == owner {
            return true;
        }
        if entry.expires_at <= now {
            entry.owner = owner;
            entry.expires_at = now + self.ttl;
            return true;
        }
        false
    }

    fn refresh(&self, key: &str, owner: Uuid) -> bool {
        match self.locks.get_mut(key) {
            Some(mut entry) if entry.owner == owner => {
                entry.expires_at = Instant::now() + self.ttl;
                true
            }
            _ => false,
        }
    }

    fn release(&self, key: &str, owner: Uuid) {
        // Delete only while still owned.
        self.locks.remove_if(key, |_, holder| holder.owner == owner);
    }

    /// Acquires the lock, retrying with bounded backoff. The
    /// returned guard refreshes its TTL until released or dropped.
    pub async fn obtain(self: &Arc<Self>, key: &str) -> Result<LockGuard> {
        let owner = Uuid::new_v4();
        let mut backoff = self.ttl / 10;
        for attempt in 0..self.max_attempts {
            if self.try_obtain(key, owner) {
                return Ok(LockGuard::new(self.clone(), key.to_string(), owner));
            }
            if attempt + 1 < self.max_attempts {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(self.ttl);
            }
        }
        Err(Error::LockNotObtained(key.to_string()))
    }

    /// Single acquisition attempt, for callers that skip on
    /// contention instead of waiting.
    pub fn try_lock(self: &Arc<Self>, key: &str) -> Option<LockGuard> {
        let owner = Uuid::new_v4();
        self.try_obtain(key, owner)
            .then(|| LockGuard::new(self.clone(), key.to_string(), owner))
    }
}

/// Held lock. Dropping releases; [`LockGuard::release`] does so
/// eagerly.
pub struct LockGuard {
    service: Arc<LockService>,
    key: String,
    owner: Uuid,
    refresher: JoinHandle<()>,
}

impl LockGuard {
    fn new(service: Arc<LockService>, key: String, owner: Uuid) -> Self {
        let refresher = tokio::spawn({
            let service = service.clone();
            let key = key.clone();
            let interval = service.ttl / 3;
            async move {
                loop {
                    tokio::time::sleep(interval).await;
                    if !service.refresh(&key, owner) {
                        warn!(key = %key, "no longer holding lock, refresh stopped");
                        return;
                    }
                }
            }
        });
        Self {
            service,
            key,
            owner,
            refresher,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(self) {}
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.refresher.abort();
        self.service.release(&self.key, self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mutual_exclusion() {
        let svc = LockService::new(Duration::from_secs(10));
        let guard = svc.obtain("b:o:v").await.unwrap();
        assert!(svc.try_lock("b:o:v").is_none());
        guard.release();
        assert!(svc.try_lock("b:o:v").is_some());
    }

    #[tokio::test]
    async fn test_distinct_versions_do_not_contend() {
        let svc = LockService::new(Duration::from_secs(10));
        let _a = svc.obtain(&object_lock_key("b", "o", "0")).await.unwrap();
        let _b = svc.obtain(&object_lock_key("b", "o", "7")).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_holder_is_evicted() {
        let svc = LockService::new(Duration::from_millis(30));
        let guard = svc.obtain("k").await.unwrap();
        // Kill the refresher so the TTL lapses.
        guard.refresher.abort();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(svc.try_lock("k").is_some());
    }

    #[tokio::test]
    async fn test_refresh_keeps_lock_alive() {
        let svc = LockService::new(Duration::from_millis(60));
        let _guard = svc.obtain("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        // Still held because the guard refreshed it.
        assert!(svc.try_lock("k").is_none());
    }

    #[tokio::test]
    async fn test_obtain_waits_then_fails() {
        let svc = LockService::new(Duration::from_millis(50));
        let guard = svc.obtain("k").await.unwrap();
        let contender = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.obtain("k").await })
        };
        drop(guard);
        // The contender eventually wins after the release.
        assert!(contender.await.unwrap().is_ok());
    }
}
