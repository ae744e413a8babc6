//! Metagate Backend - blob cluster interface and placement
//!
//! Object bytes live in opaque blob clusters addressed by a string
//! id. The metadata plane only needs put/append/get/remove plus a
//! usage probe for placement decisions.

pub mod cluster;
pub mod memory;
pub mod picker;

pub use cluster::{BlobReader, Cluster, ClusterUsage, read_all};
pub use memory::MemCluster;
pub use picker::{PoolPicker, WeightedCluster};

/// Low-latency pool receiving fresh appendable objects.
pub const FAST_POOL: &str = "rabbit";

/// Capacity pool that cooled objects migrate into.
pub const CAPACITY_POOL: &str = "tiger";
