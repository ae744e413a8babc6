//! Process-local LRU tier

use std::collections::HashMap;

use parking_lot::Mutex;

struct Entry {
    value: Vec<u8>,
    last_access: u64,
}

struct Inner {
    map: HashMap<String, Entry>,
    clock: u64,
}

/// Capacity-bounded LRU over encoded rows.
pub(crate) struct LruCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl LruCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                clock: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        let entry = inner.map.get_mut(key)?;
        entry.last_access = clock;
        Some(entry.value.clone())
    }

    pub(crate) fn put(&self, key: &str, value: Vec<u8>) {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        if inner.map.len() >= self.capacity && !inner.map.contains_key(key) {
            if let Some(oldest) = inner
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                inner.map.remove(&oldest);
            }
        }
        inner.map.insert(
            key.to_string(),
            Entry {
                value,
                last_access: clock,
            },
        );
    }

    pub(crate) fn remove(&self, key: &str) {
        self.inner.lock().map.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_put_remove() {
        let lru = LruCache::new(4);
        assert_eq!(lru.get("a"), None);
        lru.put("a", b"1".to_vec());
        assert_eq!(lru.get("a"), Some(b"1".to_vec()));
        lru.remove("a");
        assert_eq!(lru.get("a"), None);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let lru = LruCache::new(2);
        lru.put("a", b"1".to_vec());
        lru.put("b", b"2".to_vec());
        lru.get("a");
        lru.put("c", b"3".to_vec());
        assert_eq!(lru.get("b"), None);
        assert!(lru.get("a").is_some());
        assert!(lru.get("c").is_some());
    }
}
