//! Cache of devices the agent has deployed.

use crate::model::LogicalConfig;
use std::collections::HashMap;

/// A deployed device: the pool it serves and its VIP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CachedDevice {
    pub pool_id: String,
    pub port_id: String,
}

/// Known devices, indexed by pool id and by VIP port id.
#[derive(Debug, Default)]
pub struct LogicalDeviceCache {
    by_pool: HashMap<String, CachedDevice>,
    pool_by_port: HashMap<String, String>,
}

impl LogicalDeviceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a device. A pool whose VIP port changed is re-indexed.
    pub fn put(&mut self, config: &LogicalConfig) {
        let device = CachedDevice {
            pool_id: config.pool_id().to_string(),
            port_id: config.vip.port.id.clone(),
        };

        if let Some(previous) = self.by_pool.get(&device.pool_id) {
            if previous == &device {
                return;
            }
            self.pool_by_port.remove(&previous.port_id);
        }

        self.pool_by_port
            .insert(device.port_id.clone(), device.pool_id.clone());
        self.by_pool.insert(device.pool_id.clone(), device);
    }

    /// Forget a device; returns it if it was known.
    pub fn remove_by_pool_id(&mut self, pool_id: &str) -> Option<CachedDevice> {
        let device = self.by_pool.remove(pool_id)?;
        if self.pool_by_port.get(&device.port_id).map(String::as_str) == Some(pool_id) {
            self.pool_by_port.remove(&device.port_id);
        }
        Some(device)
    }

    pub fn get_by_pool_id(&self, pool_id: &str) -> Option<&CachedDevice> {
        self.by_pool.get(pool_id)
    }

    pub fn get_by_port_id(&self, port_id: &str) -> Option<&CachedDevice> {
        self.pool_by_port
            .get(port_id)
            .and_then(|pool_id| self.by_pool.get(pool_id))
    }

    /// Known pool ids, sorted.
    pub fn pool_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.by_pool.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.by_pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pool.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pool_id: &str, port_id: &str) -> LogicalConfig {
        serde_yaml::from_str(&format!(
            "vip: {{ protocol_port: 80, port: {{ id: {} }} }}\npool: {{ id: {}, protocol: TCP }}\n",
            port_id, pool_id
        ))
        .unwrap()
    }

    #[test]
    fn test_put_and_lookup() {
        let mut cache = LogicalDeviceCache::new();
        cache.put(&config("pool-a", "port-a"));
        cache.put(&config("pool-a", "port-a"));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_by_pool_id("pool-a").unwrap().port_id, "port-a");
        assert_eq!(cache.get_by_port_id("port-a").unwrap().pool_id, "pool-a");
        assert!(cache.get_by_pool_id("pool-b").is_none());
    }

    #[test]
    fn test_port_change_reindexes() {
        let mut cache = LogicalDeviceCache::new();
        cache.put(&config("pool-a", "port-a"));
        cache.put(&config("pool-a", "port-b"));

        assert_eq!(cache.len(), 1);
        assert!(cache.get_by_port_id("port-a").is_none());
        assert_eq!(cache.get_by_port_id("port-b").unwrap().pool_id, "pool-a");
    }

    #[test]
    fn test_remove_and_pool_ids() {
        let mut cache = LogicalDeviceCache::new();
        cache.put(&config("pool-b", "port-b"));
        cache.put(&config("pool-a", "port-a"));
        assert_eq!(cache.pool_ids(), vec!["pool-a", "pool-b"]);

        let removed = cache.remove_by_pool_id("pool-a").unwrap();
        assert_eq!(removed.port_id, "port-a");
        assert!(cache.get_by_port_id("port-a").is_none());
        assert!(cache.remove_by_pool_id("pool-a").is_none());
        assert_eq!(cache.pool_ids(), vec!["pool-b"]);
    }
}
