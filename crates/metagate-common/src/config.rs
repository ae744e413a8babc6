//! Configuration for Metagate
//!
//! Plain serde structures with defaults matching a single-node
//! deployment. The gateway binary loads these from a JSON file and
//! environment overrides.

use serde::{Deserialize, Serialize};

/// Metadata cache mode, chosen at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// No caching, every read hits the KV store.
    Off,
    /// Remote cache tier only.
    Simple,
    /// Process-local LRU in front of the remote tier.
    #[default]
    Tiered,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub meta: MetaConfig,
    pub cache: CacheConfig,
    pub qos: QosConfig,
    pub gc: GcConfig,
    pub migration: MigrationConfig,
    pub lifecycle: LifecycleConfig,
    pub restore: RestoreConfig,
    pub kms: KmsConfig,
    pub backend: BackendConfig,

    /// Scales lifecycle/restore day counts down to seconds for
    /// end-to-end testing.
    pub debug_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    /// Path of the embedded KV database file
    pub db_path: String,
    /// Per-append maximum object size
    pub object_size_limit: u64, // 30 MiB
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            db_path: "/var/lib/metagate/meta.redb".to_string(),
            object_size_limit: 30 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub meta_cache_type: CacheMode,
    pub enable_data_cache: bool,
    /// Capacity of the process-local tier, in entries
    pub local_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            meta_cache_type: CacheMode::Tiered,
            enable_data_cache: false,
            local_capacity: 65536,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QosConfig {
    pub enable_qos: bool,
    /// Fallback limits applied when a user has no QoS row
    pub default_read_ops: u64,
    pub default_write_ops: u64,
    pub default_bandwidth_kbps: u64,
    /// Largest single token acquisition, bounds the refill buffer
    pub upload_max_chunk_size: u64, // 8 MiB
    pub download_buf_pool_size: u64, // 8 MiB
    /// Seconds between refreshes of the in-memory limit mirror
    pub refresh_interval_secs: u64, // 10 minutes
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            enable_qos: false,
            default_read_ops: 2000,
            default_write_ops: 1000,
            default_bandwidth_kbps: 100 * 1024,
            upload_max_chunk_size: 8 * 1024 * 1024,
            download_buf_pool_size: 8 * 1024 * 1024,
            refresh_interval_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    pub gc_thread: usize,
    pub scan_interval_secs: u64,
    pub batch_size: usize,
    /// A record stuck in Deleting longer than this is reclaimed
    pub stuck_reset_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            gc_thread: 2,
            scan_interval_secs: 30,
            batch_size: 50,
            stuck_reset_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub mg_thread: usize,
    pub mg_object_cooldown_seconds: u64,
    pub mg_scan_interval_seconds: u64,
    /// Bounded dispatch queue between scanner and workers
    pub queue_length: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            mg_thread: 2,
            mg_object_cooldown_seconds: 3600,
            mg_scan_interval_seconds: 600,
            queue_length: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub lc_thread: usize,
    pub scan_interval_secs: u64,
    pub page_size: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            lc_thread: 1,
            scan_interval_secs: 3600,
            page_size: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    pub scan_interval_secs: u64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KmsConfig {
    /// Selects the KMS driver, `"local"` or `"vault"`
    pub kms_type: String,
    pub key_id: String,
    /// Hex-encoded 32-byte master key for the local driver
    pub master_key_hex: String,
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            kms_type: "local".to_string(),
            key_id: "metagate-default".to_string(),
            master_key_hex: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Pool-selection guard: clusters above this used-space percent
    /// are excluded from weighted selection
    pub cluster_max_used_space_percent: u8, // 85
    /// Seconds a usage probe stays cached per pool
    pub usage_cache_secs: u64, // 24 h
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            cluster_max_used_space_percent: 85,
            usage_cache_secs: 24 * 3600,
        }
    }
}
