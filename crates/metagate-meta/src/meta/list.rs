//! Bucket listings
//!
//! Object rows of one bucket are contiguous in key order and the
//! rows of one name form an adjacent group: the null row first, then
//! versioned rows newest-first. Listings walk the range in pages and
//! fold each group into either its visible version or, under a
//! delimiter, a common prefix.

use metagate_common::Result;
use metagate_kv::codec;

use crate::keys;
use crate::types::Object;

use super::Meta;

/// Rows fetched per KV scan while walking a listing.
const SCAN_PAGE: usize = 1_000;

/// A page of current-version listings.
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub objects: Vec<Object>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// Name to resume after when truncated.
    pub next_marker: Option<String>,
}

/// A page of version listings.
#[derive(Debug, Clone, Default)]
pub struct VersionedListResult {
    pub objects: Vec<Object>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_version_marker: Option<String>,
}

/// One name group: every row sharing `(bucket, name)`.
struct Group {
    name: String,
    rows: Vec<Object>,
}

impl Group {
    /// The version a non-versioned GET would see.
    fn visible(&self) -> Option<&Object> {
        self.rows.iter().max_by_key(|o| o.create_time_ns)
    }

    /// Rows newest-first, the null row placed by its create time.
    fn sorted_desc(mut self) -> Vec<Object> {
        self.rows
            .sort_by(|a, b| b.create_time_ns.cmp(&a.create_time_ns));
        self.rows
    }
}

/// Collapses a name under the delimiter, if it has a remainder
/// containing one.
fn common_prefix_of(name: &str, prefix: &str, delimiter: &str) -> Option<String> {
    if delimiter.is_empty() {
        return None;
    }
    let rest = name.strip_prefix(prefix)?;
    let idx = rest.find(delimiter)?;
    Some(format!(
        "{prefix}{}",
        &rest[..idx + delimiter.len()]
    ))
}

impl Meta {
    /// Lists current versions: the newest row of each name, skipping
    /// names whose newest row is a delete marker. Names collapsing
    /// under `delimiter` are reported once as common prefixes.
    pub fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        marker: &str,
        max_keys: usize,
    ) -> Result<ListResult> {
        self.get_bucket(bucket, false)?;
        let budget = if max_keys == 0 { usize::MAX } else { max_keys };
        let mut result = ListResult::default();
        let mut last_emitted: Option<String> = None;

        let start = if marker.is_empty() {
            list_start(bucket, prefix)
        } else {
            keys::bucket_objects_start_after(bucket, marker)
        };
        self.walk_groups(bucket, prefix, start, |group| {
            let entry = common_prefix_of(&group.name, prefix, delimiter);
            let entry_name = entry.as_deref().unwrap_or(&group.name);
            // A collapsed prefix covers many names; do not repeat it,
            // and do not re-report anything at or before the marker.
            if !marker.is_empty() && entry_name <= marker {
                return Ok(true);
            }
            if last_emitted.as_deref() == Some(entry_name) {
                return Ok(true);
            }
            let visible = match entry {
                Some(_) => None,
                None => match group.visible() {
                    Some(v) if v.delete_marker => return Ok(true),
                    other => other.cloned(),
                },
            };
            if result.objects.len() + result.common_prefixes.len() >= budget {
                result.is_truncated = true;
                result.next_marker = last_emitted.clone();
                return Ok(false);
            }
            last_emitted = Some(entry_name.to_string());
            match entry {
                Some(cp) => result.common_prefixes.push(cp),
                None => {
                    if let Some(object) = visible {
                        result.objects.push(object);
                    }
                }
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// Newest visible version per name with no delimiter handling,
    /// for the lifecycle scanner.
    pub fn list_latest_objects(
        &self,
        bucket: &str,
        marker: &str,
        max_keys: usize,
    ) -> Result<ListResult> {
        self.list_objects(bucket, "", "", marker, max_keys)
    }

    /// Lists every version, delete markers included, newest-first
    /// within each name. The compound `(key_marker, version_marker)`
    /// cursor resumes mid-name.
    pub fn list_versioned_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        key_marker: &str,
        version_marker: &str,
        max_keys: usize,
    ) -> Result<VersionedListResult> {
        self.get_bucket(bucket, false)?;
        let budget = if max_keys == 0 { usize::MAX } else { max_keys };
        let mut result = VersionedListResult::default();
        let mut last_prefix: Option<String> = None;

        let start = if key_marker.is_empty() {
            list_start(bucket, prefix)
        } else if version_marker.is_empty() {
            keys::bucket_objects_start_after(bucket, key_marker)
        } else {
            // Rewalk the marker's group: within-name order is by
            // create time, not key order.
            keys::object_key(bucket, key_marker, None)
        };
        self.walk_groups(bucket, prefix, start, |group| {
            if let Some(cp) = common_prefix_of(&group.name, prefix, delimiter) {
                if !key_marker.is_empty() && cp.as_str() <= key_marker {
                    return Ok(true);
                }
                if last_prefix.as_deref() == Some(cp.as_str()) {
                    return Ok(true);
                }
                if result.objects.len() + result.common_prefixes.len() >= budget {
                    result.is_truncated = true;
                    return Ok(false);
                }
                last_prefix = Some(cp.clone());
                result.common_prefixes.push(cp);
                return Ok(true);
            }

            let resuming = group.name == key_marker && !version_marker.is_empty();
            let name = group.name.clone();
            let mut past_marker = !resuming;
            for object in group.sorted_desc() {
                if !past_marker {
                    past_marker = object.external_version_id() == version_marker;
                    continue;
                }
                if result.objects.len() + result.common_prefixes.len() >= budget {
                    result.is_truncated = true;
                    result.next_key_marker = Some(name.clone());
                    return Ok(false);
                }
                result.objects.push(object);
            }
            Ok(true)
        })?;
        if result.is_truncated {
            if let Some(last) = result.objects.last() {
                result.next_key_marker = Some(last.name.clone());
                result.next_version_marker = Some(last.external_version_id());
            }
        }
        Ok(result)
    }

    /// Walks name groups in key order starting at `start`, calling
    /// `visit` once per group until it returns `false` or the prefix
    /// range is exhausted.
    fn walk_groups(
        &self,
        bucket: &str,
        prefix: &str,
        mut start: Vec<u8>,
        mut visit: impl FnMut(Group) -> Result<bool>,
    ) -> Result<()> {
        let (_, range_end) = keys::bucket_objects_range(bucket);
        let mut current: Option<Group> = None;
        'pages: loop {
            let rows = self.store().scan(&start, &range_end, SCAN_PAGE)?;
            let page_len = rows.len();
            for (key, bytes) in rows {
                start = key.clone();
                start.push(0x00);
                let object: Object = codec::decode(&bytes)?;
                if !object.name.starts_with(prefix) {
                    if object.name.as_str() > prefix {
                        break 'pages;
                    }
                    continue;
                }
                match &mut current {
                    Some(group) if group.name == object.name => group.rows.push(object),
                    _ => {
                        if let Some(done) = current.take() {
                            if !visit(done)? {
                                return Ok(());
                            }
                        }
                        current = Some(Group {
                            name: object.name.clone(),
                            rows: vec![object],
                        });
                    }
                }
            }
            if page_len < SCAN_PAGE {
                break;
            }
        }
        if let Some(done) = current {
            visit(done)?;
        }
        Ok(())
    }
}

/// First key of a prefixed listing. Every name starting with the
/// prefix sorts at or after the prefix's own null key.
fn list_start(bucket: &str, prefix: &str) -> Vec<u8> {
    if prefix.is_empty() {
        keys::bucket_objects_range(bucket).0
    } else {
        keys::object_key(bucket, prefix, None)
    }
}
