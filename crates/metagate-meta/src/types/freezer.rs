//! Freezer rows tracking thawed archival copies

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::keys;
use crate::types::Part;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FreezerStatus {
    /// Restore requested, not started
    #[default]
    Ready,
    /// A worker is copying the blob out of the archive
    Restoring,
    /// Thawed copy available until the TTL lapses
    Finished,
}

/// Tracks the life of a thawed copy of one archived object version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Freezer {
    pub bucket_name: String,
    pub object_name: String,
    /// Version component of the archived object
    pub version: String,
    pub status: FreezerStatus,
    /// Days the thawed copy stays readable
    pub life_time_days: u32,
    pub size: u64,
    pub location: String,
    pub pool: String,
    pub object_id: String,
    pub parts: BTreeMap<u32, Part>,
    pub create_time_ns: u64,
}

impl Freezer {
    #[must_use]
    pub fn key(&self) -> Vec<u8> {
        keys::freezer_key(&self.bucket_name, &self.object_name, &self.version)
    }

    /// Whether a finished thaw has outlived its TTL. Debug mode
    /// scales days down to seconds.
    #[must_use]
    pub fn expired(&self, now_ns: u64, debug_mode: bool) -> bool {
        if self.status != FreezerStatus::Finished {
            return false;
        }
        let unit_ns: u64 = if debug_mode {
            1_000_000_000
        } else {
            24 * 3600 * 1_000_000_000
        };
        let ttl = u64::from(self.life_time_days).saturating_mul(unit_ns);
        now_ns.saturating_sub(self.create_time_ns) >= ttl
    }
}
