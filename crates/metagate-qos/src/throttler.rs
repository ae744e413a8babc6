//! Per-user throttling front

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use metagate_common::Result;

use crate::bucket::TokenBucket;
use crate::throttle::{RefillPool, ThrottledReader, ThrottledWriter};

/// Effective limits of one user. Zero means unlimited for that
/// dimension.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserLimits {
    pub user_id: String,
    pub read_qps: u64,
    pub write_qps: u64,
    pub bandwidth_kbps: u64,
}

/// Source of limit rows and bucket ownership, polled periodically.
pub trait QosProvider: Send + Sync {
    fn user_limits(&self) -> Result<Vec<UserLimits>>;
    /// `(bucket, owner)` pairs.
    fn bucket_owners(&self) -> Result<Vec<(String, String)>>;
}

struct UserBuckets {
    read: Option<TokenBucket>,
    write: Option<TokenBucket>,
    bandwidth: Option<Arc<TokenBucket>>,
}

impl UserBuckets {
    fn new(limits: &UserLimits) -> Self {
        let qps = |rate: u64| (rate > 0).then(|| TokenBucket::new(rate, rate));
        Self {
            read: qps(limits.read_qps),
            write: qps(limits.write_qps),
            bandwidth: (limits.bandwidth_kbps > 0).then(|| {
                let bytes = limits.bandwidth_kbps * 1024;
                Arc::new(TokenBucket::new(bytes, bytes))
            }),
        }
    }

    fn update(&mut self, limits: &UserLimits) {
        *self = Self::new(limits);
    }
}

/// Per-user throttler. Holds mirrors of the `(bucket → owner)` and
/// `(owner → limits)` tables; [`Throttler::refresh`] repopulates
/// them from the provider, so lookups on the request path never
/// touch the store.
pub struct Throttler {
    enabled: bool,
    defaults: UserLimits,
    users: DashMap<String, Arc<parking_lot::RwLock<UserBuckets>>>,
    owners: DashMap<String, String>,
    pool: Arc<RefillPool>,
}

impl Throttler {
    #[must_use]
    pub fn new(enabled: bool, defaults: UserLimits, pool: Arc<RefillPool>) -> Self {
        Self {
            enabled,
            defaults,
            users: DashMap::new(),
            owners: DashMap::new(),
            pool,
        }
    }

    /// Repopulates both mirrors. Provider failures leave the old
    /// mirrors in place.
    pub fn refresh(&self, provider: &dyn QosProvider) {
        match provider.bucket_owners() {
            Ok(pairs) => {
                self.owners.clear();
                for (bucket, owner) in pairs {
                    self.owners.insert(bucket, owner);
                }
            }
            Err(error) => warn!(%error, "bucket owner refresh failed"),
        }
        match provider.user_limits() {
            Ok(rows) => {
                for limits in rows {
                    match self.users.get(&limits.user_id) {
                        Some(buckets) => buckets.write().update(&limits),
                        None => {
                            self.users.insert(
                                limits.user_id.clone(),
                                Arc::new(parking_lot::RwLock::new(UserBuckets::new(&limits))),
                            );
                        }
                    }
                }
                debug!(users = self.users.len(), "qos limits refreshed");
            }
            Err(error) => warn!(%error, "qos limit refresh failed"),
        }
    }

    /// Periodic refresh until cancelled.
    pub async fn run(self: Arc<Self>, provider: Arc<dyn QosProvider>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.refresh(provider.as_ref());
        }
    }

    fn buckets_for(&self, bucket_name: &str) -> Option<Arc<parking_lot::RwLock<UserBuckets>>> {
        if !self.enabled {
            return None;
        }
        let owner = self.owners.get(bucket_name).map(|r| r.value().clone())?;
        if let Some(buckets) = self.users.get(&owner) {
            return Some(Arc::clone(buckets.value()));
        }
        // No row for this user: fall back to the configured
        // defaults, materialized once.
        let mut defaults = self.defaults.clone();
        defaults.user_id = owner.clone();
        let entry = self
            .users
            .entry(owner)
            .or_insert_with(|| Arc::new(parking_lot::RwLock::new(UserBuckets::new(&defaults))));
        Some(Arc::clone(entry.value()))
    }

    /// Consumes one read token, sleeping out the shortfall.
    pub async fn allow_read(&self, bucket_name: &str) {
        self.allow(bucket_name, |b| &b.read).await;
    }

    /// Consumes one write token, sleeping out the shortfall.
    pub async fn allow_write(&self, bucket_name: &str) {
        self.allow(bucket_name, |b| &b.write).await;
    }

    async fn allow(
        &self,
        bucket_name: &str,
        pick: impl Fn(&UserBuckets) -> &Option<TokenBucket>,
    ) {
        let Some(buckets) = self.buckets_for(bucket_name) else {
            return;
        };
        loop {
            let wait = {
                let guard = buckets.read();
                match pick(&guard) {
                    Some(bucket) => match bucket.try_acquire(1) {
                        Ok(()) => return,
                        Err(wait) => wait,
                    },
                    None => return,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Wraps a download stream in the owner's bandwidth budget, or
    /// returns it untouched when unlimited.
    pub fn wrap_reader<R: AsyncRead + Send + Unpin + 'static>(
        &self,
        bucket_name: &str,
        reader: R,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        match self.bandwidth_of(bucket_name) {
            Some(bucket) => Ok(Box::new(ThrottledReader::new(
                reader,
                bucket,
                Arc::clone(&self.pool),
            )?)),
            None => Ok(Box::new(reader)),
        }
    }

    /// Wraps an upload sink in the owner's bandwidth budget.
    pub fn wrap_writer<W: AsyncWrite + Send + Unpin + 'static>(
        &self,
        bucket_name: &str,
        writer: W,
    ) -> Result<Box<dyn AsyncWrite + Send + Unpin>> {
        match self.bandwidth_of(bucket_name) {
            Some(bucket) => Ok(Box::new(ThrottledWriter::new(
                writer,
                bucket,
                Arc::clone(&self.pool),
            )?)),
            None => Ok(Box::new(writer)),
        }
    }

    fn bandwidth_of(&self, bucket_name: &str) -> Option<Arc<TokenBucket>> {
        let buckets = self.buckets_for(bucket_name)?;
        let guard = buckets.read();
        guard.bandwidth.as_ref().map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct StaticProvider {
        limits: Vec<UserLimits>,
        owners: Vec<(String, String)>,
    }

    impl QosProvider for StaticProvider {
        fn user_limits(&self) -> Result<Vec<UserLimits>> {
            Ok(self.limits.clone())
        }
        fn bucket_owners(&self) -> Result<Vec<(String, String)>> {
            Ok(self.owners.clone())
        }
    }

    fn throttler(limits: UserLimits) -> Throttler {
        let t = Throttler::new(
            true,
            UserLimits::default(),
            Arc::new(RefillPool::new(1024 * 1024, 64 * 1024)),
        );
        t.refresh(&StaticProvider {
            limits: vec![limits],
            owners: vec![("mybucket".into(), "u1".into())],
        });
        t
    }

    #[tokio::test]
    async fn test_qps_limits_delay_requests() {
        let t = throttler(UserLimits {
            user_id: "u1".into(),
            read_qps: 50,
            ..UserLimits::default()
        });

        // Drain the burst, then one more request must wait.
        for _ in 0..50 {
            t.allow_read("mybucket").await;
        }
        let started = Instant::now();
        t.allow_read("mybucket").await;
        assert!(started.elapsed() >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_unknown_bucket_unthrottled() {
        let t = throttler(UserLimits {
            user_id: "u1".into(),
            read_qps: 1,
            ..UserLimits::default()
        });
        for _ in 0..10 {
            t.allow_read("otherbucket").await;
        }
    }

    #[tokio::test]
    async fn test_disabled_wraps_nothing() {
        let t = Throttler::new(
            false,
            UserLimits::default(),
            Arc::new(RefillPool::new(0, 0)),
        );
        t.allow_write("any").await;
        assert!(t.bandwidth_of("any").is_none());
    }

    #[tokio::test]
    async fn test_refresh_updates_limits_in_place() {
        let t = throttler(UserLimits {
            user_id: "u1".into(),
            write_qps: 1,
            ..UserLimits::default()
        });
        t.allow_write("mybucket").await;

        // Lifting the limit takes effect without restarting.
        t.refresh(&StaticProvider {
            limits: vec![UserLimits {
                user_id: "u1".into(),
                ..UserLimits::default()
            }],
            owners: vec![("mybucket".into(), "u1".into())],
        });
        let started = Instant::now();
        for _ in 0..100 {
            t.allow_write("mybucket").await;
        }
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
