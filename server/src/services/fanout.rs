//! Targeted and broadcast event delivery to live connections.
//!
//! Frames are serialized once and pushed onto actor mailboxes with
//! `try_send`; no network I/O happens while a registry entry is borrowed.
//! Per-device order is preserved because each device has a single current
//! handle and actor mailboxes are FIFO.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use crate::services::identity::DeviceIdentity;
use crate::services::session_registry::SessionRegistry;
use crate::services::watcher_registry::WatcherRegistry;

pub struct FanoutDispatcher {
    sessions: Arc<SessionRegistry>,
    watchers: Arc<WatcherRegistry>,
}

impl FanoutDispatcher {
    pub fn new(sessions: Arc<SessionRegistry>, watchers: Arc<WatcherRegistry>) -> Self {
        Self { sessions, watchers }
    }

    fn frame(event: &str, payload: &JsonValue) -> String {
        json!({
            "type": event,
            "payload": payload,
            "timestamp": Utc::now(),
        })
        .to_string()
    }

    /// Deliver an event to the device's current connection, if any.
    ///
    /// A device without a live session makes this a silent no-op. There is
    /// no retry or queue; the registration catch-up path re-delivers the
    /// latest persisted instruction when the device comes back.
    pub fn send_to_device(&self, identity: &DeviceIdentity, event: &str, payload: &JsonValue) -> bool {
        match self.sessions.lookup(identity) {
            Some(handle) => {
                let delivered = handle.try_send(&Self::frame(event, payload));
                if !delivered {
                    warn!(
                        device_id = %identity,
                        connection_id = %handle.id,
                        event = %event,
                        "Device mailbox rejected frame"
                    );
                }
                delivered
            }
            None => {
                debug!(
                    device_id = %identity,
                    event = %event,
                    "No live session for device; dropping event"
                );
                false
            }
        }
    }

    /// Deliver an event to every watcher of one device, independent of the
    /// device's own connectivity. Returns the number of frames delivered.
    pub fn notify_watchers(&self, identity: &DeviceIdentity, event: &str, payload: &JsonValue) -> usize {
        let frame = Self::frame(event, payload);
        let mut delivered = 0;
        for handle in self.watchers.watchers_of(identity) {
            if handle.try_send(&frame) {
                delivered += 1;
            } else {
                warn!(
                    device_id = %identity,
                    connection_id = %handle.id,
                    event = %event,
                    "Watcher mailbox rejected frame"
                );
            }
        }
        debug!(
            device_id = %identity,
            event = %event,
            delivered = delivered,
            "Notified watchers"
        );
        delivered
    }

    /// Deliver an event to every open dashboard connection, regardless of
    /// per-device watch subscriptions. Returns the number delivered.
    pub fn broadcast(&self, event: &str, payload: &JsonValue) -> usize {
        let frame = Self::frame(event, payload);
        let mut delivered = 0;
        for handle in self.watchers.dashboards() {
            if handle.try_send(&frame) {
                delivered += 1;
            }
        }
        debug!(event = %event, delivered = delivered, "Broadcast sent");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::connection::test_support::collector_handle;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn dispatcher() -> (Arc<SessionRegistry>, Arc<WatcherRegistry>, FanoutDispatcher) {
        let sessions = Arc::new(SessionRegistry::new());
        let watchers = Arc::new(WatcherRegistry::new());
        let fanout = FanoutDispatcher::new(sessions.clone(), watchers.clone());
        (sessions, watchers, fanout)
    }

    async fn settle() {
        // Let collector mailboxes drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[actix_rt::test]
    async fn test_send_to_offline_device_is_silent_noop() {
        let (_, _, fanout) = dispatcher();
        let dev = DeviceIdentity::normalize("dev-offline").unwrap();
        assert!(!fanout.send_to_device(&dev, "callCodeUpdate", &json!({"code": "*21#"})));
    }

    #[actix_rt::test]
    async fn test_watcher_isolation() {
        // A watcher of device X must never see events emitted for device Y.
        let (_, watchers, fanout) = dispatcher();
        let dev_x = DeviceIdentity::normalize("dev-x").unwrap();
        let dev_y = DeviceIdentity::normalize("dev-y").unwrap();
        let (watcher_x, frames_x) = collector_handle();

        watchers.add_watcher(&dev_x, watcher_x);

        fanout.notify_watchers(&dev_y, "deviceRealtime", &json!({"kind": "sms"}));
        settle().await;
        assert!(frames_x.lock().unwrap().is_empty());

        fanout.notify_watchers(&dev_x, "deviceRealtime", &json!({"kind": "sms"}));
        settle().await;
        assert_eq!(frames_x.lock().unwrap().len(), 1);
    }

    #[actix_rt::test]
    async fn test_change_event_reaches_watchers_and_device() {
        // Three dashboards watch A, B, B; an event for B reaches exactly the
        // two B watchers, and the device connection when B is online.
        let (sessions, watchers, fanout) = dispatcher();
        let dev_a = DeviceIdentity::normalize("a").unwrap();
        let dev_b = DeviceIdentity::normalize("b").unwrap();

        let (watcher_a, frames_a) = collector_handle();
        let (watcher_b1, frames_b1) = collector_handle();
        let (watcher_b2, frames_b2) = collector_handle();
        let (device_b, device_frames) = collector_handle();

        watchers.add_watcher(&dev_a, watcher_a);
        watchers.add_watcher(&dev_b, watcher_b1);
        watchers.add_watcher(&dev_b, watcher_b2);
        sessions.register(&dev_b, device_b);

        let payload = json!({"kind": "callCode", "deviceId": "b"});
        let notified = fanout.notify_watchers(&dev_b, "deviceRealtime", &payload);
        let sent = fanout.send_to_device(&dev_b, "callCodeUpdate", &payload);
        settle().await;

        assert_eq!(notified, 2);
        assert!(sent);
        assert!(frames_a.lock().unwrap().is_empty());
        assert_eq!(frames_b1.lock().unwrap().len(), 1);
        assert_eq!(frames_b2.lock().unwrap().len(), 1);
        assert_eq!(device_frames.lock().unwrap().len(), 1);
    }

    #[actix_rt::test]
    async fn test_broadcast_reaches_every_dashboard() {
        let (_, watchers, fanout) = dispatcher();
        let (d1, f1) = collector_handle();
        let (d2, f2) = collector_handle();

        watchers.add_dashboard(d1);
        watchers.add_dashboard(d2);

        let delivered = fanout.broadcast("deviceListChanged", &json!({"event": "insert"}));
        settle().await;

        assert_eq!(delivered, 2);
        assert_eq!(f1.lock().unwrap().len(), 1);
        assert_eq!(f2.lock().unwrap().len(), 1);

        let frame: JsonValue =
            serde_json::from_str(f1.lock().unwrap().first().unwrap()).unwrap();
        assert_eq!(frame["type"], "deviceListChanged");
        assert_eq!(frame["payload"]["event"], "insert");
    }
}
