//! Row types persisted by the metadata core

mod bucket;
mod freezer;
mod gc;
mod misc;
mod multipart;
mod object;

pub use bucket::{Bucket, Lifecycle, LifecycleEntry, LifecycleRule};
pub use freezer::{Freezer, FreezerStatus};
pub use gc::{GarbageRecord, GcStatus, MAX_GC_TRIES};
pub use misc::{ClusterRecord, UserQos};
pub use multipart::Multipart;
pub use object::{Object, Part};
