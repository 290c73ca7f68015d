//! Observer-side registries: per-device watcher sets plus the global pool of
//! open dashboard connections.
//!
//! A reverse index (connection id -> watched identities) makes disconnect
//! cleanup O(1) in the number of devices that connection was watching,
//! instead of a scan over every watched device.

use std::collections::{HashMap, HashSet};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::services::connection::ConnectionHandle;
use crate::services::identity::DeviceIdentity;

pub struct WatcherRegistry {
    /// identity -> (connection id -> handle)
    watchers: DashMap<String, HashMap<Uuid, ConnectionHandle>>,
    /// connection id -> identities it watches
    watched_by: DashMap<Uuid, HashSet<String>>,
    /// every currently open dashboard connection, watch subscriptions aside
    dashboards: DashMap<Uuid, ConnectionHandle>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self {
            watchers: DashMap::new(),
            watched_by: DashMap::new(),
            dashboards: DashMap::new(),
        }
    }

    /// Subscribe a connection to live events for one device.
    pub fn add_watcher(&self, identity: &DeviceIdentity, handle: ConnectionHandle) {
        let conn_id = handle.id;
        self.watchers
            .entry(identity.as_str().to_string())
            .or_insert_with(HashMap::new)
            .insert(conn_id, handle);
        self.watched_by
            .entry(conn_id)
            .or_insert_with(HashSet::new)
            .insert(identity.as_str().to_string());

        debug!(device_id = %identity, connection_id = %conn_id, "Watcher added");
    }

    pub fn remove_watcher(&self, identity: &DeviceIdentity, conn_id: Uuid) {
        let mut prune = false;
        if let Some(mut set) = self.watchers.get_mut(identity.as_str()) {
            set.remove(&conn_id);
            prune = set.is_empty();
        }
        if prune {
            // Pruning hygiene: drop the empty set so the map does not grow
            // with identities nobody watches anymore.
            if let Entry::Occupied(entry) = self.watchers.entry(identity.as_str().to_string()) {
                if entry.get().is_empty() {
                    entry.remove();
                }
            }
        }

        if let Some(mut identities) = self.watched_by.get_mut(&conn_id) {
            identities.remove(identity.as_str());
        }

        debug!(device_id = %identity, connection_id = %conn_id, "Watcher removed");
    }

    /// Snapshot of the current watchers of one device, safe to iterate while
    /// the registry keeps mutating.
    pub fn watchers_of(&self, identity: &DeviceIdentity) -> Vec<ConnectionHandle> {
        self.watchers
            .get(identity.as_str())
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Scrub a connection from every watcher set and from the dashboard
    /// pool. Called on observer disconnect; the caller does not need to know
    /// which devices the connection was watching.
    pub fn remove_handle_everywhere(&self, conn_id: Uuid) {
        if let Some((_, identities)) = self.watched_by.remove(&conn_id) {
            for identity in identities {
                let mut prune = false;
                if let Some(mut set) = self.watchers.get_mut(&identity) {
                    set.remove(&conn_id);
                    prune = set.is_empty();
                }
                if prune {
                    if let Entry::Occupied(entry) = self.watchers.entry(identity.clone()) {
                        if entry.get().is_empty() {
                            entry.remove();
                        }
                    }
                }
            }
        }
        self.dashboards.remove(&conn_id);

        debug!(connection_id = %conn_id, "Observer connection scrubbed");
    }

    /// Add an open dashboard connection to the global broadcast pool.
    pub fn add_dashboard(&self, handle: ConnectionHandle) {
        debug!(connection_id = %handle.id, "Dashboard connection joined broadcast pool");
        self.dashboards.insert(handle.id, handle);
    }

    /// Snapshot of every open dashboard connection.
    pub fn dashboards(&self) -> Vec<ConnectionHandle> {
        self.dashboards
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn watcher_count(&self, identity: &DeviceIdentity) -> usize {
        self.watchers
            .get(identity.as_str())
            .map(|set| set.len())
            .unwrap_or(0)
    }

    pub fn dashboard_count(&self) -> usize {
        self.dashboards.len()
    }
}

impl Default for WatcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::connection::test_support::collector_handle;
    use pretty_assertions::assert_eq;

    #[actix_rt::test]
    async fn test_add_and_list_watchers() {
        let registry = WatcherRegistry::new();
        let dev_a = DeviceIdentity::normalize("dev-a").unwrap();
        let dev_b = DeviceIdentity::normalize("dev-b").unwrap();
        let (w1, _) = collector_handle();
        let (w2, _) = collector_handle();
        let (w3, _) = collector_handle();

        registry.add_watcher(&dev_a, w1);
        registry.add_watcher(&dev_b, w2);
        registry.add_watcher(&dev_b, w3);

        assert_eq!(registry.watcher_count(&dev_a), 1);
        assert_eq!(registry.watcher_count(&dev_b), 2);
    }

    #[actix_rt::test]
    async fn test_watch_is_idempotent_per_connection() {
        let registry = WatcherRegistry::new();
        let dev = DeviceIdentity::normalize("dev-a").unwrap();
        let (w, _) = collector_handle();

        registry.add_watcher(&dev, w.clone());
        registry.add_watcher(&dev, w);

        assert_eq!(registry.watcher_count(&dev), 1);
    }

    #[actix_rt::test]
    async fn test_remove_watcher_prunes_empty_set() {
        let registry = WatcherRegistry::new();
        let dev = DeviceIdentity::normalize("dev-a").unwrap();
        let (w, _) = collector_handle();
        let conn_id = w.id;

        registry.add_watcher(&dev, w);
        registry.remove_watcher(&dev, conn_id);

        assert_eq!(registry.watcher_count(&dev), 0);
        assert!(registry.watchers_of(&dev).is_empty());
    }

    #[actix_rt::test]
    async fn test_remove_handle_everywhere() {
        let registry = WatcherRegistry::new();
        let dev_a = DeviceIdentity::normalize("dev-a").unwrap();
        let dev_b = DeviceIdentity::normalize("dev-b").unwrap();
        let (observer, _) = collector_handle();
        let (other, _) = collector_handle();
        let observer_id = observer.id;

        registry.add_dashboard(observer.clone());
        registry.add_watcher(&dev_a, observer.clone());
        registry.add_watcher(&dev_b, observer);
        registry.add_watcher(&dev_b, other);

        registry.remove_handle_everywhere(observer_id);

        assert_eq!(registry.watcher_count(&dev_a), 0);
        assert_eq!(registry.watcher_count(&dev_b), 1);
        assert_eq!(registry.dashboard_count(), 0);
    }
}
