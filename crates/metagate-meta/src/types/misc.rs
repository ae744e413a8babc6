//! Cluster weight and user-QoS rows

use serde::{Deserialize, Serialize};

use crate::keys;

/// Weighted placement record for one `(pool, cluster)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClusterRecord {
    pub pool: String,
    /// Cluster id, the `location` stored in object rows
    pub fsid: String,
    pub backend: String,
    pub weight: u32,
}

impl ClusterRecord {
    #[must_use]
    pub fn key(&self) -> Vec<u8> {
        keys::cluster_key(&self.pool, &self.fsid, &self.backend)
    }
}

/// Per-user throttling limits. Zero means "use the configured
/// default".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserQos {
    pub user_id: String,
    pub read_qps: u64,
    pub write_qps: u64,
    pub bandwidth_kbps: u64,
}

impl UserQos {
    #[must_use]
    pub fn key(&self) -> Vec<u8> {
        keys::qos_key(&self.user_id)
    }
}
