//! Lifecycle expiration scanner
//!
//! Paginates over the lifecycle cross-index, reads each bucket's
//! rule set and expires the current version of every matching
//! object. Deletion goes through the versioning-aware path, so
//! versioned buckets accumulate delete markers instead of losing
//! data. Debug mode counts rule days as seconds.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, warn};

use metagate_common::{LifecycleConfig, Result, now_ns};
use metagate_meta::Meta;

pub struct LifecycleWorker {
    meta: Arc<Meta>,
    config: LifecycleConfig,
    debug_mode: bool,
}

impl LifecycleWorker {
    #[must_use]
    pub fn new(meta: Arc<Meta>, config: LifecycleConfig, debug_mode: bool) -> Self {
        Self {
            meta,
            config,
            debug_mode,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(self.config.scan_interval_secs));
        loop {
            ticker.tick().await;
            match self.run_once() {
                Ok(0) => {}
                Ok(expired) => debug!(expired, "lifecycle pass finished"),
                Err(error) => warn!(%error, "lifecycle pass failed"),
            }
        }
    }

    /// One full pass over every bucket with lifecycle rules.
    /// Returns the number of objects expired.
    pub fn run_once(&self) -> Result<usize> {
        let mut expired = 0;
        let mut marker: Option<String> = None;
        loop {
            let entries = self.meta.scan_lifecycle(marker.as_deref(), self.config.page_size)?;
            let Some(last) = entries.last() else { break };
            marker = Some(last.bucket_name.clone());
            let page_len = entries.len();
            for entry in entries {
                expired += self.expire_bucket(&entry.bucket_name)?;
            }
            if page_len < self.config.page_size {
                break;
            }
        }
        Ok(expired)
    }

    fn expire_bucket(&self, bucket_name: &str) -> Result<usize> {
        let bucket = match self.meta.get_bucket(bucket_name, false) {
            Ok(bucket) => bucket,
            // The bucket went away after its index entry was read.
            Err(error) if error.is_not_found() => return Ok(0),
            Err(error) => return Err(error),
        };
        let Some(lifecycle) = bucket.lifecycle else {
            return Ok(0);
        };

        let unit_ns: u64 = if self.debug_mode {
            1_000_000_000
        } else {
            24 * 3600 * 1_000_000_000
        };
        let now = now_ns();
        let mut expired = 0;
        let mut marker = String::new();
        loop {
            let page = self
                .meta
                .list_latest_objects(bucket_name, &marker, self.config.page_size)?;
            for object in &page.objects {
                let Some(days) = lifecycle.expiry_days_for(&object.name) else {
                    continue;
                };
                let ttl_ns = days.saturating_mul(unit_ns);
                if now.saturating_sub(object.last_modified_ns) < ttl_ns {
                    continue;
                }
                match self.meta.delete_object(bucket_name, &object.name) {
                    Ok(_) => {
                        expired += 1;
                        debug!(
                            bucket = %bucket_name,
                            object = %object.name,
                            days,
                            "object expired by lifecycle"
                        );
                    }
                    Err(error) if error.is_not_found() => {}
                    Err(error) => warn!(
                        bucket = %bucket_name,
                        object = %object.name,
                        %error,
                        "lifecycle expiration failed"
                    ),
                }
            }
            match page.next_marker {
                Some(next) if page.is_truncated => marker = next,
                _ => break,
            }
        }
        Ok(expired)
    }
}
