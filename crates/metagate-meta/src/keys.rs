//! Key codec
//!
//! Every entity lives in one flat keyspace. A key is byte-string
//! components joined by a separator that never occurs in a
//! component; one-character prefixes pick the table. Live objects
//! carry no prefix, which is safe because bucket names are at least
//! three characters.
//!
//! ```text
//! b        buckets          b·{name}
//! u        user→buckets     u·{owner}·{bucket}
//! m        multiparts       m·{bucket}·{object}·{upload}
//! p        object parts     p·{bucket}·{object}·{version}·{part:05}
//! c        clusters         c·{pool}·{fsid}·{backend}
//! g        garbage          g·{pool}·{location}·{object_id}
//! f        freezer          f·{bucket}·{object}·{version}
//! h        hot objects      h·{bucket}·{object}·{version}
//! q        QoS              q·{user_id}
//! l        lifecycle        l·{bucket}
//! (none)   live objects     {bucket}·{object}[·{version}]
//! ```
//!
//! The version component is `u64::MAX - create_time_ns` as a
//! fixed-width decimal, so ascending key order lists newest first.
//! The null version omits the component entirely and therefore sorts
//! before every versioned sibling of the same name.

/// Component separator. Never occurs in names, pools or ids.
pub const SEP: u8 = 0x1F;

/// Range sentinels around a common prefix.
const RANGE_LOW: u8 = 0x00;
const RANGE_HIGH: u8 = 0xFF;

const BUCKET_PREFIX: &[u8] = b"b";
const USER_PREFIX: &[u8] = b"u";
const MULTIPART_PREFIX: &[u8] = b"m";
const PART_PREFIX: &[u8] = b"p";
const CLUSTER_PREFIX: &[u8] = b"c";
const GC_PREFIX: &[u8] = b"g";
const FREEZER_PREFIX: &[u8] = b"f";
const HOT_PREFIX: &[u8] = b"h";
const QOS_PREFIX: &[u8] = b"q";
const LIFECYCLE_PREFIX: &[u8] = b"l";

fn join(components: &[&[u8]]) -> Vec<u8> {
    let len = components.iter().map(|c| c.len() + 1).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    for (i, c) in components.iter().enumerate() {
        if i > 0 {
            key.push(SEP);
        }
        key.extend_from_slice(c);
    }
    key
}

fn range_of(prefix_key: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
    let mut start = prefix_key.clone();
    start.push(SEP);
    start.push(RANGE_LOW);
    let mut end = prefix_key;
    end.push(SEP);
    end.push(RANGE_HIGH);
    (start, end)
}

/// Fixed-width reversed-timestamp version component.
#[must_use]
pub fn version_component(create_time_ns: u64) -> String {
    format!("{:020}", u64::MAX - create_time_ns)
}

/// Inverts [`version_component`].
#[must_use]
pub fn version_create_time(component: &str) -> Option<u64> {
    component.parse::<u64>().ok().map(|v| u64::MAX - v)
}

// Buckets

#[must_use]
pub fn bucket_key(name: &str) -> Vec<u8> {
    join(&[BUCKET_PREFIX, name.as_bytes()])
}

// User-bucket index

#[must_use]
pub fn user_bucket_key(owner: &str, bucket: &str) -> Vec<u8> {
    join(&[USER_PREFIX, owner.as_bytes(), bucket.as_bytes()])
}

#[must_use]
pub fn user_buckets_range(owner: &str) -> (Vec<u8>, Vec<u8>) {
    range_of(join(&[USER_PREFIX, owner.as_bytes()]))
}

#[must_use]
pub fn all_users_range() -> (Vec<u8>, Vec<u8>) {
    range_of(USER_PREFIX.to_vec())
}

// Live objects

/// Key of one object version. `None` is the null version.
#[must_use]
pub fn object_key(bucket: &str, object: &str, create_time_ns: Option<u64>) -> Vec<u8> {
    match create_time_ns {
        None => join(&[bucket.as_bytes(), object.as_bytes()]),
        Some(ts) => join(&[
            bucket.as_bytes(),
            object.as_bytes(),
            version_component(ts).as_bytes(),
        ]),
    }
}

/// All versions of one name, the null row included.
#[must_use]
pub fn object_versions_range(bucket: &str, object: &str) -> (Vec<u8>, Vec<u8>) {
    let prefix = join(&[bucket.as_bytes(), object.as_bytes()]);
    // The null row is the bare prefix, so the range starts at it
    // rather than at prefix·0x00.
    let start = prefix.clone();
    let mut end = prefix;
    end.push(SEP);
    end.push(RANGE_HIGH);
    (start, end)
}

/// Every object row of one bucket.
#[must_use]
pub fn bucket_objects_range(bucket: &str) -> (Vec<u8>, Vec<u8>) {
    range_of(bucket.as_bytes().to_vec())
}

/// Scan start for listings resuming after `marker`, or the bucket
/// range start when no marker is set.
#[must_use]
pub fn bucket_objects_start_after(bucket: &str, marker: &str) -> Vec<u8> {
    let mut start = join(&[bucket.as_bytes(), marker.as_bytes()]);
    start.push(SEP);
    start.push(RANGE_HIGH);
    start
}

// Parts

#[must_use]
pub fn part_key(bucket: &str, object: &str, version: &str, part_number: u32) -> Vec<u8> {
    join(&[
        PART_PREFIX,
        bucket.as_bytes(),
        object.as_bytes(),
        version.as_bytes(),
        format!("{part_number:05}").as_bytes(),
    ])
}

#[must_use]
pub fn parts_range(bucket: &str, object: &str, version: &str) -> (Vec<u8>, Vec<u8>) {
    range_of(join(&[
        PART_PREFIX,
        bucket.as_bytes(),
        object.as_bytes(),
        version.as_bytes(),
    ]))
}

// Multiparts

/// Upload component: reversed initial time as big-endian hex, so
/// newer uploads sort first under the same `{bucket, object}`.
#[must_use]
pub fn upload_component(initial_time_ns: u64) -> String {
    hex::encode((u64::MAX - initial_time_ns).to_be_bytes())
}

#[must_use]
pub fn multipart_key(bucket: &str, object: &str, initial_time_ns: u64) -> Vec<u8> {
    join(&[
        MULTIPART_PREFIX,
        bucket.as_bytes(),
        object.as_bytes(),
        upload_component(initial_time_ns).as_bytes(),
    ])
}

#[must_use]
pub fn bucket_multiparts_range(bucket: &str) -> (Vec<u8>, Vec<u8>) {
    range_of(join(&[MULTIPART_PREFIX, bucket.as_bytes()]))
}

// Clusters

#[must_use]
pub fn cluster_key(pool: &str, fsid: &str, backend: &str) -> Vec<u8> {
    join(&[
        CLUSTER_PREFIX,
        pool.as_bytes(),
        fsid.as_bytes(),
        backend.as_bytes(),
    ])
}

#[must_use]
pub fn clusters_range() -> (Vec<u8>, Vec<u8>) {
    range_of(CLUSTER_PREFIX.to_vec())
}

// Garbage

#[must_use]
pub fn gc_key(pool: &str, location: &str, object_id: &str) -> Vec<u8> {
    join(&[
        GC_PREFIX,
        pool.as_bytes(),
        location.as_bytes(),
        object_id.as_bytes(),
    ])
}

#[must_use]
pub fn gc_range() -> (Vec<u8>, Vec<u8>) {
    range_of(GC_PREFIX.to_vec())
}

// Freezer

#[must_use]
pub fn freezer_key(bucket: &str, object: &str, version: &str) -> Vec<u8> {
    join(&[
        FREEZER_PREFIX,
        bucket.as_bytes(),
        object.as_bytes(),
        version.as_bytes(),
    ])
}

#[must_use]
pub fn freezer_range() -> (Vec<u8>, Vec<u8>) {
    range_of(FREEZER_PREFIX.to_vec())
}

// Hot objects

#[must_use]
pub fn hot_object_key(bucket: &str, object: &str, version: &str) -> Vec<u8> {
    join(&[
        HOT_PREFIX,
        bucket.as_bytes(),
        object.as_bytes(),
        version.as_bytes(),
    ])
}

#[must_use]
pub fn hot_objects_range() -> (Vec<u8>, Vec<u8>) {
    range_of(HOT_PREFIX.to_vec())
}

// QoS

#[must_use]
pub fn qos_key(user_id: &str) -> Vec<u8> {
    join(&[QOS_PREFIX, user_id.as_bytes()])
}

#[must_use]
pub fn qos_range() -> (Vec<u8>, Vec<u8>) {
    range_of(QOS_PREFIX.to_vec())
}

// Lifecycle

#[must_use]
pub fn lifecycle_key(bucket: &str) -> Vec<u8> {
    join(&[LIFECYCLE_PREFIX, bucket.as_bytes()])
}

#[must_use]
pub fn lifecycle_range() -> (Vec<u8>, Vec<u8>) {
    range_of(LIFECYCLE_PREFIX.to_vec())
}

/// Splits a key back into its components.
#[must_use]
pub fn split(key: &[u8]) -> Vec<&[u8]> {
    key.split(|b| *b == SEP).collect()
}
