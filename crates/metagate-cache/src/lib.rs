//! Metagate Cache - metadata cache tiers
//!
//! Read-mostly metadata (buckets, objects, users, cluster weights)
//! is cached in front of the KV store. Three modes: off, remote tier
//! only, or a process-local LRU in front of the remote tier. A cache
//! outage is never fatal; the loader result wins.

mod lru;
mod remote;

pub mod cache;

pub use cache::{CacheStats, CacheTable, MetaCache};
pub use remote::{InMemoryRemoteCache, RemoteCache};
