//! Metagate gateway process
//!
//! Wires the metadata plane together for an S3 front end: the
//! embedded KV store, metadata cache, blob cluster picker, lock
//! service, KMS driver and QoS throttler, plus the background
//! workers. The HTTP surface itself plugs in through
//! [`RequestContext`].

pub mod app;
pub mod context;

pub use app::App;
pub use context::{AuthType, RequestContext};
