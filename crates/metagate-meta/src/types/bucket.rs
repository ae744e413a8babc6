//! Bucket rows, lifecycle rules and the lifecycle cross-index

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use metagate_common::{Acl, StorageClass, VersioningState};

use crate::keys;

/// A bucket row, keyed by globally unique name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Bucket {
    pub name: String,
    pub owner_id: String,
    pub created_at_ns: u64,
    pub versioning: VersioningState,
    /// Live bytes per storage class. Signed: delete markers and
    /// replacement races may transiently dip below zero.
    pub usage: BTreeMap<String, i64>,
    pub acl: Acl,
    pub cors: Option<String>,
    pub lifecycle: Option<Lifecycle>,
    pub policy: Option<String>,
    pub website: Option<String>,
    pub encryption: Option<String>,
    pub logging: Option<String>,
}

impl Bucket {
    #[must_use]
    pub fn key(&self) -> Vec<u8> {
        keys::bucket_key(&self.name)
    }

    /// Applies a signed usage delta for one storage class.
    pub fn apply_usage(&mut self, class: StorageClass, delta: i64) {
        *self.usage.entry(class.as_str().to_string()).or_insert(0) += delta;
    }

    #[must_use]
    pub fn usage_of(&self, class: StorageClass) -> i64 {
        self.usage.get(class.as_str()).copied().unwrap_or(0)
    }
}

/// Expiration rule set of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Lifecycle {
    pub rules: Vec<LifecycleRule>,
}

/// One expiration rule. An empty prefix makes it the default rule
/// for keys no prefixed rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleRule {
    pub id: String,
    pub prefix: String,
    pub expiry_days: u64,
    pub enabled: bool,
}

impl Lifecycle {
    /// Expiry in days for one key: the longest matching prefixed
    /// rule wins, then the default rule.
    #[must_use]
    pub fn expiry_days_for(&self, key: &str) -> Option<u64> {
        let mut best: Option<&LifecycleRule> = None;
        for rule in self.rules.iter().filter(|r| r.enabled) {
            if rule.prefix.is_empty() || key.starts_with(&rule.prefix) {
                let better = best
                    .is_none_or(|b| rule.prefix.len() > b.prefix.len());
                if better {
                    best = Some(rule);
                }
            }
        }
        best.map(|r| r.expiry_days)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Cross-index row so the scanner enumerates only buckets with a
/// non-empty lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEntry {
    pub bucket_name: String,
    pub status: String,
    pub start_time_ns: u64,
    pub end_time_ns: u64,
}

impl LifecycleEntry {
    #[must_use]
    pub fn key(&self) -> Vec<u8> {
        keys::lifecycle_key(&self.bucket_name)
    }
}
