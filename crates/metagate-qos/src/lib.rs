//! Metagate QoS
//!
//! Per-user request-rate and bandwidth throttling for the gateway.
//! Token buckets cover three dimensions per user (read ops, write
//! ops, bytes); streams are paced by throttled reader/writer
//! adapters, with a process-wide refill pool recycling unused byte
//! tokens between streams.

mod bucket;
mod throttle;
mod throttler;

pub use bucket::TokenBucket;
pub use throttle::{RefillPool, ThrottledReader, ThrottledWriter};
pub use throttler::{QosProvider, Throttler, UserLimits};
