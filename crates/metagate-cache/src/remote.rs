//! Remote cache tier

use dashmap::DashMap;

use metagate_common::Result;

/// The shared cache tier sitting between processes and the KV store.
pub trait RemoteCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    fn del(&self, key: &str) -> Result<()>;
}

/// Remote tier held in process memory. Stands in for an external
/// cache service on single-node deployments and in tests.
#[derive(Default)]
pub struct InMemoryRemoteCache {
    map: DashMap<String, Vec<u8>>,
}

impl InMemoryRemoteCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RemoteCache for InMemoryRemoteCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.get(key).map(|v| v.clone()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn del(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }
}
