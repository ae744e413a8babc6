//! QoS limit and cluster placement rows

use metagate_cache::CacheTable;
use metagate_common::Result;
use metagate_kv::codec;

use crate::keys;
use crate::types::{ClusterRecord, UserQos};

use super::Meta;

impl Meta {
    pub fn get_user_qos(&self, user_id: &str, will_need: bool) -> Result<Option<UserQos>> {
        self.cache.get(CacheTable::User, user_id, will_need, || {
            self.load(&keys::qos_key(user_id))
        })
    }

    pub fn set_user_qos(&self, qos: &UserQos) -> Result<()> {
        self.put_row(&qos.key(), qos)?;
        self.cache.remove(CacheTable::User, &qos.user_id);
        Ok(())
    }

    pub fn delete_user_qos(&self, user_id: &str) -> Result<()> {
        self.store().delete(&keys::qos_key(user_id))?;
        self.cache.remove(CacheTable::User, user_id);
        Ok(())
    }

    /// Every per-user limit row, for the throttler's refresh mirror.
    pub fn get_all_user_qos(&self) -> Result<Vec<UserQos>> {
        let (start, end) = keys::qos_range();
        let rows = self.store().scan(&start, &end, 0)?;
        rows.iter().map(|(_, v)| codec::decode(v)).collect()
    }

    pub fn put_cluster(&self, cluster: &ClusterRecord) -> Result<()> {
        self.put_row(&cluster.key(), cluster)?;
        self.cache.remove(CacheTable::Cluster, "all");
        Ok(())
    }

    /// Every registered cluster weight row.
    pub fn get_clusters(&self) -> Result<Vec<ClusterRecord>> {
        let (start, end) = keys::clusters_range();
        let rows = self.store().scan(&start, &end, 0)?;
        rows.iter().map(|(_, v)| codec::decode(v)).collect()
    }
}
