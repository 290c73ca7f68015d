//! Bridges persisted-record mutations into the live fanout layer.
//!
//! Mutations made through the REST layer (or by any other process writing
//! the same tables) are published as JSON payloads on one Postgres NOTIFY
//! channel; the bridge LISTENs on that channel, resolves the owning device
//! identity from each event, and routes it to the device's connection, its
//! watchers, and the global dashboard broadcast. The listen loop
//! resubscribes forever with a fixed backoff; stream interruption is never
//! fatal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::services::fanout::FanoutDispatcher;
use crate::services::identity::DeviceIdentity;

pub const COLLECTION_DEVICES: &str = "devices";
pub const COLLECTION_CALL_CODES: &str = "call_codes";
pub const COLLECTION_CALL_FORWARD_LOGS: &str = "call_forward_logs";
pub const COLLECTION_SMS_COMMANDS: &str = "sms_commands";
pub const COLLECTION_SIM_INFO: &str = "sim_info";
pub const COLLECTION_NOTIFICATIONS: &str = "notifications";
pub const COLLECTION_ADMIN_NUMBER: &str = "admin_number";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
}

/// One insert/update observed on a persisted collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub op: ChangeOp,
    pub device_id: Option<String>,
    pub record: JsonValue,
}

impl ChangeEvent {
    pub fn new(
        collection: &str,
        op: ChangeOp,
        device_id: Option<&DeviceIdentity>,
        record: JsonValue,
    ) -> Self {
        Self {
            collection: collection.to_string(),
            op,
            device_id: device_id.map(|id| id.as_str().to_string()),
            record,
        }
    }
}

/// Publish a change event so every listening bridge (this process included)
/// observes it.
pub async fn publish_change(pool: &PgPool, channel: &str, event: &ChangeEvent) -> AppResult<()> {
    let payload = serde_json::to_string(event)?;
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(channel)
        .bind(payload)
        .execute(pool)
        .await?;
    Ok(())
}

/// Source of the most recent persisted instruction for a device, used for
/// catch-up delivery on registration.
#[async_trait]
pub trait InstructionStore: Send + Sync {
    async fn find_latest(&self, identity: &DeviceIdentity) -> AppResult<Option<JsonValue>>;
}

pub struct ChangeBridge {
    fanout: Arc<FanoutDispatcher>,
    instructions: Arc<dyn InstructionStore>,
}

impl ChangeBridge {
    pub fn new(fanout: Arc<FanoutDispatcher>, instructions: Arc<dyn InstructionStore>) -> Self {
        Self {
            fanout,
            instructions,
        }
    }

    /// Route one change event through the fanout layer.
    pub fn route(&self, event: &ChangeEvent) {
        let identity = match event.device_id.as_deref() {
            Some(raw) => match DeviceIdentity::normalize(raw) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    warn!(
                        collection = %event.collection,
                        error = %e,
                        "Change event carries an invalid device id; dropping"
                    );
                    return;
                }
            },
            None => None,
        };

        match (event.collection.as_str(), identity) {
            (COLLECTION_CALL_CODES, Some(identity)) => {
                self.fanout
                    .send_to_device(&identity, "callCodeUpdate", &event.record);
                self.notify_realtime(&identity, "callCode", &event.record);
            }
            (COLLECTION_CALL_FORWARD_LOGS, Some(identity)) => {
                self.fanout
                    .send_to_device(&identity, "callCommand", &event.record);
                self.notify_realtime(&identity, "callForward", &event.record);
            }
            (COLLECTION_SMS_COMMANDS, Some(identity)) => {
                self.fanout
                    .send_to_device(&identity, "smsCommand", &event.record);
                self.notify_realtime(&identity, "sms", &event.record);
            }
            (COLLECTION_SIM_INFO, Some(identity)) => {
                self.notify_realtime(&identity, "simInfo", &event.record);
            }
            (COLLECTION_NOTIFICATIONS, Some(identity)) => {
                self.notify_realtime(&identity, "notification", &event.record);
            }
            (COLLECTION_DEVICES, _) => {
                self.fanout.broadcast(
                    "deviceListChanged",
                    &json!({ "event": event.op, "record": event.record }),
                );
            }
            (COLLECTION_ADMIN_NUMBER, _) => {
                self.fanout.broadcast("adminNumberChanged", &event.record);
            }
            (collection, _) => {
                debug!(collection = %collection, "Change event for unrouted collection");
            }
        }
    }

    fn notify_realtime(&self, identity: &DeviceIdentity, kind: &str, record: &JsonValue) {
        self.fanout.notify_watchers(
            identity,
            "deviceRealtime",
            &json!({
                "kind": kind,
                "deviceId": identity.as_str(),
                "record": record,
            }),
        );
    }

    /// Catch-up delivery: push the latest persisted instruction to a device
    /// that just registered, covering instructions issued while it was
    /// offline and therefore never observed as a live change event.
    pub async fn deliver_latest_instruction(&self, identity: &DeviceIdentity) {
        match self.instructions.find_latest(identity).await {
            Ok(Some(record)) => {
                info!(device_id = %identity, "Delivering latest instruction on registration");
                self.fanout.send_to_device(identity, "callCodeUpdate", &record);
            }
            Ok(None) => {
                debug!(device_id = %identity, "No persisted instruction to catch up");
            }
            Err(e) => {
                warn!(
                    device_id = %identity,
                    error = %e,
                    "Failed to load latest instruction for catch-up"
                );
            }
        }
    }

    /// Long-lived LISTEN loop. Any error (connect, LISTEN, or recv) is
    /// logged and followed by a resubscribe after `retry_backoff`.
    pub fn spawn_listen_loop(
        self: Arc<Self>,
        pool: PgPool,
        channel: String,
        retry_backoff: Duration,
    ) {
        let bridge = self;
        tokio::spawn(async move {
            loop {
                match PgListener::connect_with(&pool).await {
                    Ok(mut listener) => match listener.listen(&channel).await {
                        Ok(()) => {
                            info!(channel = %channel, "Subscribed to change feed");
                            loop {
                                match listener.recv().await {
                                    Ok(notification) => {
                                        match serde_json::from_str::<ChangeEvent>(
                                            notification.payload(),
                                        ) {
                                            Ok(event) => bridge.route(&event),
                                            Err(e) => warn!(
                                                error = %e,
                                                "Discarding malformed change event"
                                            ),
                                        }
                                    }
                                    Err(e) => {
                                        warn!(
                                            error = %e,
                                            "Change feed interrupted; resubscribing"
                                        );
                                        break;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, channel = %channel, "Failed to LISTEN on change feed");
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "Failed to connect change feed listener");
                    }
                }
                tokio::time::sleep(retry_backoff).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::connection::test_support::collector_handle;
    use crate::services::session_registry::SessionRegistry;
    use crate::services::watcher_registry::WatcherRegistry;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MemoryInstructionStore {
        latest: Mutex<HashMap<String, JsonValue>>,
    }

    impl MemoryInstructionStore {
        fn new() -> Self {
            Self {
                latest: Mutex::new(HashMap::new()),
            }
        }

        fn put(&self, identity: &DeviceIdentity, record: JsonValue) {
            self.latest
                .lock()
                .unwrap()
                .insert(identity.as_str().to_string(), record);
        }
    }

    #[async_trait]
    impl InstructionStore for MemoryInstructionStore {
        async fn find_latest(&self, identity: &DeviceIdentity) -> AppResult<Option<JsonValue>> {
            Ok(self.latest.lock().unwrap().get(identity.as_str()).cloned())
        }
    }

    struct Fixture {
        sessions: Arc<SessionRegistry>,
        watchers: Arc<WatcherRegistry>,
        instructions: Arc<MemoryInstructionStore>,
        bridge: Arc<ChangeBridge>,
    }

    fn fixture() -> Fixture {
        let sessions = Arc::new(SessionRegistry::new());
        let watchers = Arc::new(WatcherRegistry::new());
        let fanout = Arc::new(FanoutDispatcher::new(sessions.clone(), watchers.clone()));
        let instructions = Arc::new(MemoryInstructionStore::new());
        let bridge = Arc::new(ChangeBridge::new(fanout, instructions.clone()));
        Fixture {
            sessions,
            watchers,
            instructions,
            bridge,
        }
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    #[actix_rt::test]
    async fn test_call_code_change_reaches_device_and_watchers() {
        let fx = fixture();
        let dev = DeviceIdentity::normalize("dev-1").unwrap();
        let (device, device_frames) = collector_handle();
        let (watcher, watcher_frames) = collector_handle();

        fx.sessions.register(&dev, device);
        fx.watchers.add_watcher(&dev, watcher);

        let event = ChangeEvent::new(
            COLLECTION_CALL_CODES,
            ChangeOp::Update,
            Some(&dev),
            json!({"code": "*21*1234#", "type": "ussd", "simSlot": 0}),
        );
        fx.bridge.route(&event);
        settle().await;

        let device_frames = device_frames.lock().unwrap();
        assert_eq!(device_frames.len(), 1);
        let frame: JsonValue = serde_json::from_str(&device_frames[0]).unwrap();
        assert_eq!(frame["type"], "callCodeUpdate");

        let watcher_frames = watcher_frames.lock().unwrap();
        assert_eq!(watcher_frames.len(), 1);
        let frame: JsonValue = serde_json::from_str(&watcher_frames[0]).unwrap();
        assert_eq!(frame["type"], "deviceRealtime");
        assert_eq!(frame["payload"]["kind"], "callCode");
    }

    #[actix_rt::test]
    async fn test_device_change_broadcasts_list_update() {
        let fx = fixture();
        let (dashboard, frames) = collector_handle();
        fx.watchers.add_dashboard(dashboard);

        let dev = DeviceIdentity::normalize("dev-9").unwrap();
        let event = ChangeEvent::new(
            COLLECTION_DEVICES,
            ChangeOp::Insert,
            Some(&dev),
            json!({"uniqueId": "dev-9"}),
        );
        fx.bridge.route(&event);
        settle().await;

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let frame: JsonValue = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["type"], "deviceListChanged");
        assert_eq!(frame["payload"]["event"], "insert");
    }

    #[actix_rt::test]
    async fn test_offline_catchup_delivers_exactly_once_on_registration() {
        // While the device is offline an instruction lands in the store; the
        // live change event goes nowhere. On registration the catch-up path
        // delivers the latest instruction exactly once.
        let fx = fixture();
        let dev = DeviceIdentity::normalize("dev-2").unwrap();
        let record = json!({"code": "*21*5550100#", "type": "ussd", "simSlot": 1});

        fx.instructions.put(&dev, record.clone());
        let event = ChangeEvent::new(
            COLLECTION_CALL_CODES,
            ChangeOp::Insert,
            Some(&dev),
            record,
        );
        fx.bridge.route(&event);
        settle().await;

        // Device reconnects and registers.
        let (device, device_frames) = collector_handle();
        fx.sessions.register(&dev, device);
        fx.bridge.deliver_latest_instruction(&dev).await;
        settle().await;

        let frames = device_frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let frame: JsonValue = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["type"], "callCodeUpdate");
        assert_eq!(frame["payload"]["code"], "*21*5550100#");
    }

    #[actix_rt::test]
    async fn test_catchup_without_instruction_is_noop() {
        let fx = fixture();
        let dev = DeviceIdentity::normalize("dev-3").unwrap();
        let (device, device_frames) = collector_handle();
        fx.sessions.register(&dev, device);

        fx.bridge.deliver_latest_instruction(&dev).await;
        settle().await;

        assert!(device_frames.lock().unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn test_invalid_device_id_in_event_is_dropped() {
        let fx = fixture();
        let (dashboard, frames) = collector_handle();
        fx.watchers.add_dashboard(dashboard);

        let event = ChangeEvent {
            collection: COLLECTION_CALL_CODES.to_string(),
            op: ChangeOp::Insert,
            device_id: Some("   ".to_string()),
            record: json!({}),
        };
        fx.bridge.route(&event);
        settle().await;

        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_change_event_round_trips_through_feed_payload() {
        let dev = DeviceIdentity::normalize("dev-5").unwrap();
        let event = ChangeEvent::new(
            COLLECTION_SMS_COMMANDS,
            ChangeOp::Update,
            Some(&dev),
            json!({"to": "+15550100", "body": "ping"}),
        );
        let payload = serde_json::to_string(&event).unwrap();
        let parsed: ChangeEvent = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed.collection, COLLECTION_SMS_COMMANDS);
        assert_eq!(parsed.op, ChangeOp::Update);
        assert_eq!(parsed.device_id.as_deref(), Some("dev-5"));
    }
}
