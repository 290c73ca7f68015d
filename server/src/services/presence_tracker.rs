//! Presence state derivation and persistence.
//!
//! Transitions per device: Unknown -> Online -> (grace window) -> Offline.
//! Registration and heartbeats mark a device Online immediately; a confirmed
//! disconnect only marks it Offline after a grace window, and only if no
//! newer session has registered in the meantime. The in-memory registries
//! stay authoritative for live behavior even when persistence lags.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::services::fanout::FanoutDispatcher;
use crate::services::identity::DeviceIdentity;
use crate::services::session_registry::SessionRegistry;

pub const STATUS_ONLINE: &str = "ONLINE";
pub const STATUS_BUSY: &str = "BUSY";
pub const STATUS_IDLE: &str = "IDLE";
pub const STATUS_OFFLINE: &str = "OFFLINE";

pub const CONNECTIVITY_ONLINE: &str = "Online";
pub const CONNECTIVITY_OFFLINE: &str = "Offline";

/// Derive the coarse status bucket from a device-reported connectivity
/// string. The literal connectivity value is preserved alongside it.
pub fn derive_status(connectivity: &str) -> &'static str {
    let lower = connectivity.to_lowercase();
    if lower.contains("online") {
        STATUS_ONLINE
    } else if lower.contains("busy") {
        STATUS_BUSY
    } else if lower.contains("idle") {
        STATUS_IDLE
    } else {
        STATUS_OFFLINE
    }
}

/// Persistence boundary for the per-device presence record. One row per
/// identity; a single idempotent upsert per transition.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn upsert_presence(
        &self,
        identity: &DeviceIdentity,
        status: &str,
        connectivity: &str,
        last_seen_at: DateTime<Utc>,
    ) -> AppResult<()>;
}

pub struct PresenceTracker {
    sessions: Arc<SessionRegistry>,
    store: Arc<dyn PresenceStore>,
    fanout: Arc<FanoutDispatcher>,
    offline_grace: Duration,
}

impl PresenceTracker {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        store: Arc<dyn PresenceStore>,
        fanout: Arc<FanoutDispatcher>,
        offline_grace: Duration,
    ) -> Self {
        Self {
            sessions,
            store,
            fanout,
            offline_grace,
        }
    }

    /// Registration path: the device is Online as of now.
    pub async fn mark_online(&self, identity: &DeviceIdentity) {
        self.apply(identity, CONNECTIVITY_ONLINE, Utc::now()).await;
    }

    /// Heartbeat path: persist whatever connectivity the device reports
    /// ("Online", "Busy", "Idle", ...) while refreshing the seen-recently
    /// signal. The literal string is passed through, not collapsed to a
    /// binary state.
    pub async fn heartbeat(&self, identity: &DeviceIdentity, connectivity: &str) {
        self.apply(identity, connectivity, Utc::now()).await;
    }

    async fn apply(&self, identity: &DeviceIdentity, connectivity: &str, seen_at: DateTime<Utc>) {
        let status = derive_status(connectivity);

        // Persistence failure is logged and absorbed; the next heartbeat
        // naturally re-attempts the write.
        if let Err(e) = self
            .store
            .upsert_presence(identity, status, connectivity, seen_at)
            .await
        {
            warn!(
                device_id = %identity,
                status = %status,
                error = %e,
                "Failed to persist presence update"
            );
        }

        self.fanout.broadcast(
            "presenceChanged",
            &json!({
                "deviceId": identity.as_str(),
                "connectivity": connectivity,
                "status": status,
                "updatedAt": seen_at,
            }),
        );
    }

    /// Connection lifecycle "ended" for the handle that was current for this
    /// identity. `released` is the result of the Session Registry's
    /// release-if-current check: `false` means a newer session already
    /// replaced the one that ended (expected race, nothing to do).
    ///
    /// A confirmed release does not mark the device Offline immediately.
    /// A delayed task waits out the grace window and re-validates that no
    /// newer session has registered; only then is Offline persisted, with
    /// the disconnect timestamp.
    pub fn connection_ended(
        &self,
        identity: DeviceIdentity,
        released: bool,
        disconnected_at: DateTime<Utc>,
    ) {
        if !released {
            debug!(
                device_id = %identity,
                "Disconnect of a replaced session; presence untouched"
            );
            return;
        }

        let sessions = self.sessions.clone();
        let store = self.store.clone();
        let fanout = self.fanout.clone();
        let grace = self.offline_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            if sessions.lookup(&identity).is_some() {
                debug!(
                    device_id = %identity,
                    "Device re-registered within grace window; offline transition skipped"
                );
                return;
            }

            info!(device_id = %identity, "Marking device Offline after grace window");

            if let Err(e) = store
                .upsert_presence(
                    &identity,
                    STATUS_OFFLINE,
                    CONNECTIVITY_OFFLINE,
                    disconnected_at,
                )
                .await
            {
                warn!(
                    device_id = %identity,
                    error = %e,
                    "Failed to persist offline transition"
                );
            }

            fanout.broadcast(
                "presenceChanged",
                &json!({
                    "deviceId": identity.as_str(),
                    "connectivity": CONNECTIVITY_OFFLINE,
                    "status": STATUS_OFFLINE,
                    "updatedAt": disconnected_at,
                }),
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::connection::test_support::collector_handle;
    use crate::services::watcher_registry::WatcherRegistry;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MemoryPresenceStore {
        records: Mutex<HashMap<String, (String, String, DateTime<Utc>)>>,
    }

    impl MemoryPresenceStore {
        fn new() -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
            }
        }

        fn status_of(&self, identity: &DeviceIdentity) -> Option<String> {
            self.records
                .lock()
                .unwrap()
                .get(identity.as_str())
                .map(|(status, _, _)| status.clone())
        }
    }

    #[async_trait]
    impl PresenceStore for MemoryPresenceStore {
        async fn upsert_presence(
            &self,
            identity: &DeviceIdentity,
            status: &str,
            connectivity: &str,
            last_seen_at: DateTime<Utc>,
        ) -> AppResult<()> {
            self.records.lock().unwrap().insert(
                identity.as_str().to_string(),
                (status.to_string(), connectivity.to_string(), last_seen_at),
            );
            Ok(())
        }
    }

    fn tracker_with(
        grace: Duration,
    ) -> (Arc<SessionRegistry>, Arc<MemoryPresenceStore>, Arc<PresenceTracker>) {
        let sessions = Arc::new(SessionRegistry::new());
        let watchers = Arc::new(WatcherRegistry::new());
        let fanout = Arc::new(FanoutDispatcher::new(sessions.clone(), watchers));
        let store = Arc::new(MemoryPresenceStore::new());
        let tracker = Arc::new(PresenceTracker::new(
            sessions.clone(),
            store.clone(),
            fanout,
            grace,
        ));
        (sessions, store, tracker)
    }

    #[test]
    fn test_derive_status_buckets() {
        assert_eq!(derive_status("Online"), STATUS_ONLINE);
        assert_eq!(derive_status("online (wifi)"), STATUS_ONLINE);
        assert_eq!(derive_status("Busy"), STATUS_BUSY);
        assert_eq!(derive_status("Idle"), STATUS_IDLE);
        assert_eq!(derive_status("Unknown"), STATUS_OFFLINE);
    }

    #[actix_rt::test]
    async fn test_heartbeat_passes_connectivity_through() {
        let (_, store, tracker) = tracker_with(Duration::from_millis(100));
        let dev = DeviceIdentity::normalize("dev-1").unwrap();

        tracker.heartbeat(&dev, "Busy").await;

        let records = store.records.lock().unwrap();
        let (status, connectivity, _) = records.get("dev-1").unwrap();
        assert_eq!(status, STATUS_BUSY);
        assert_eq!(connectivity, "Busy");
    }

    #[actix_rt::test]
    async fn test_fast_reconnect_is_not_marked_offline() {
        // register(D, A); disconnect A; register(D, B) within the grace
        // window => the delayed offline check must see B and skip.
        let (sessions, store, tracker) = tracker_with(Duration::from_millis(100));
        let dev = DeviceIdentity::normalize("dev-1").unwrap();
        let (a, _) = collector_handle();
        let (b, _) = collector_handle();
        let a_id = a.id;

        sessions.register(&dev, a);
        tracker.mark_online(&dev).await;

        let released = sessions.release_if_current(&dev, a_id);
        assert!(released);
        tracker.connection_ended(dev.clone(), released, Utc::now());

        // Reconnect before the grace window elapses.
        sessions.register(&dev, b);
        tracker.mark_online(&dev).await;

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(store.status_of(&dev).unwrap(), STATUS_ONLINE);
    }

    #[actix_rt::test]
    async fn test_unreplaced_disconnect_goes_offline_after_grace() {
        let (sessions, store, tracker) = tracker_with(Duration::from_millis(50));
        let dev = DeviceIdentity::normalize("dev-1").unwrap();
        let (a, _) = collector_handle();
        let a_id = a.id;

        sessions.register(&dev, a);
        tracker.mark_online(&dev).await;

        let released = sessions.release_if_current(&dev, a_id);
        tracker.connection_ended(dev.clone(), released, Utc::now());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.status_of(&dev).unwrap(), STATUS_OFFLINE);
    }

    #[actix_rt::test]
    async fn test_stale_release_leaves_presence_untouched() {
        let (sessions, store, tracker) = tracker_with(Duration::from_millis(50));
        let dev = DeviceIdentity::normalize("dev-1").unwrap();
        let (a, _) = collector_handle();
        let (b, _) = collector_handle();
        let a_id = a.id;

        sessions.register(&dev, a);
        sessions.register(&dev, b);
        tracker.mark_online(&dev).await;

        // A's delayed disconnect callback: release fails, nothing scheduled.
        let released = sessions.release_if_current(&dev, a_id);
        assert!(!released);
        tracker.connection_ended(dev.clone(), released, Utc::now());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.status_of(&dev).unwrap(), STATUS_ONLINE);
    }
}
