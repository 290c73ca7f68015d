//! WebSocket actor for managed-device connections.
//!
//! Connection states: Connected (unidentified) -> Registered(identity) ->
//! Closed. A register message binds the connection to a device identity in
//! the Session Registry; on close the registration is released only if this
//! connection is still the current one, and the Presence Tracker decides
//! whether the device goes Offline.

use actix::prelude::*;
use actix_web_actors::ws;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::services::change_bridge::ChangeBridge;
use crate::services::connection::{ConnectionHandle, PushFrame};
use crate::services::identity::DeviceIdentity;
use crate::services::presence_tracker::{PresenceTracker, CONNECTIVITY_ONLINE};
use crate::services::session_registry::SessionRegistry;

pub struct DeviceLinkWs {
    /// Unique identifier for this WebSocket connection
    connection_id: Uuid,
    /// Device identity (set once a register message is processed)
    identity: Option<DeviceIdentity>,
    /// Last heartbeat time
    last_heartbeat: Instant,
    sessions: Arc<SessionRegistry>,
    presence: Arc<PresenceTracker>,
    bridge: Arc<ChangeBridge>,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl DeviceLinkWs {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        presence: Arc<PresenceTracker>,
        bridge: Arc<ChangeBridge>,
        heartbeat_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            identity: None,
            last_heartbeat: Instant::now(),
            sessions,
            presence,
            bridge,
            heartbeat_interval,
            client_timeout,
        }
    }

    /// Start heartbeat process for this connection
    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(
                    connection_id = %act.connection_id,
                    device_id = ?act.identity,
                    "WebSocket client heartbeat failed, disconnecting"
                );
                ctx.stop();
                return;
            }

            ctx.ping(b"heartbeat");
        });
    }

    /// Send error message to client
    fn send_error(&self, code: &str, message: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let error_response = json!({
            "type": "error",
            "code": code,
            "message": message,
            "timestamp": Utc::now(),
        });

        ctx.text(error_response.to_string());
    }

    /// Parse and handle incoming message
    fn handle_message(&mut self, msg: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let parsed: JsonValue = match serde_json::from_str(msg) {
            Ok(json) => json,
            Err(_) => {
                warn!(
                    connection_id = %self.connection_id,
                    "Failed to parse WebSocket message"
                );
                self.send_error("invalid_json", "Invalid JSON format", ctx);
                return;
            }
        };

        let message_type = parsed
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        debug!(
            connection_id = %self.connection_id,
            message_type = %message_type,
            device_id = ?self.identity,
            "Received WebSocket message"
        );

        match message_type {
            "register" => self.handle_register(&parsed, ctx),
            "heartbeat" => self.handle_heartbeat(&parsed, ctx),
            "ping" => {
                let pong = json!({ "type": "pong" });
                ctx.text(pong.to_string());
            }
            "pong" => {}
            _ => {
                warn!(
                    connection_id = %self.connection_id,
                    message_type = %message_type,
                    "Unknown message type received"
                );
                self.send_error(
                    "unknown_message_type",
                    &format!("Unknown message type: {}", message_type),
                    ctx,
                );
            }
        }
    }

    fn handle_register(&mut self, msg: &JsonValue, ctx: &mut ws::WebsocketContext<Self>) {
        let payload = payload_of(msg);

        let raw_id = match payload.get("deviceId").and_then(|v| v.as_str()) {
            Some(id) => id,
            None => {
                warn!(
                    connection_id = %self.connection_id,
                    log_stage = "register:early_return",
                    code = "missing_device_id",
                    "Registration failed: missing deviceId"
                );
                self.send_error("missing_device_id", "Device ID is required", ctx);
                return;
            }
        };

        let identity = match DeviceIdentity::normalize(raw_id) {
            Ok(identity) => identity,
            Err(e) => {
                // Invalid identity: drop the message, mutate nothing.
                warn!(
                    connection_id = %self.connection_id,
                    log_stage = "register:early_return",
                    code = "invalid_identity",
                    error = %e,
                    "Registration failed: invalid device identity"
                );
                self.send_error("invalid_identity", "Device ID is not usable", ctx);
                return;
            }
        };

        // A connection that re-registers under a new identity gives up its
        // old one first.
        if let Some(previous) = self.identity.take() {
            if previous != identity {
                let released = self.sessions.release_if_current(&previous, self.connection_id);
                self.presence
                    .connection_ended(previous, released, Utc::now());
            }
        }

        let handle = ConnectionHandle::new(self.connection_id, ctx.address().recipient());
        if let Some(displaced) = self.sessions.register(&identity, handle) {
            if displaced.id != self.connection_id {
                // The old connection stays open but is no longer addressable;
                // its eventual disconnect is absorbed by release_if_current.
                info!(
                    connection_id = %self.connection_id,
                    device_id = %identity,
                    displaced_connection_id = %displaced.id,
                    log_stage = "register:takeover",
                    "Registration displaced an existing session"
                );
            }
        }
        self.identity = Some(identity.clone());

        info!(
            connection_id = %self.connection_id,
            device_id = %identity,
            log_stage = "register:completed",
            "Device registered via WebSocket"
        );

        let ack = json!({
            "type": "registered",
            "payload": {
                "deviceId": identity.as_str(),
                "timestamp": Utc::now(),
            },
        });
        ctx.text(ack.to_string());

        // Presence and catch-up run off the actor thread; neither holds a
        // registry lock across I/O.
        let presence = self.presence.clone();
        let bridge = self.bridge.clone();
        ctx.spawn(
            async move {
                presence.mark_online(&identity).await;
                bridge.deliver_latest_instruction(&identity).await;
            }
            .into_actor(self),
        );
    }

    fn handle_heartbeat(&mut self, msg: &JsonValue, ctx: &mut ws::WebsocketContext<Self>) {
        let payload = payload_of(msg);

        // A heartbeat may name the device explicitly (pre-registration
        // clients do); otherwise it applies to the registered identity.
        let identity = match payload.get("deviceId").and_then(|v| v.as_str()) {
            Some(raw) => match DeviceIdentity::normalize(raw) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    warn!(
                        connection_id = %self.connection_id,
                        error = %e,
                        "Heartbeat carried an invalid device identity; dropping"
                    );
                    self.send_error("invalid_identity", "Device ID is not usable", ctx);
                    return;
                }
            },
            None => self.identity.clone(),
        };

        let Some(identity) = identity else {
            debug!(
                connection_id = %self.connection_id,
                "Heartbeat from unidentified connection ignored"
            );
            return;
        };

        let connectivity = payload
            .get("connectivity")
            .and_then(|v| v.as_str())
            .unwrap_or(CONNECTIVITY_ONLINE)
            .to_string();

        let presence = self.presence.clone();
        ctx.spawn(
            async move {
                presence.heartbeat(&identity, &connectivity).await;
            }
            .into_actor(self),
        );
    }
}

/// Messages use either `{"type": ..., "payload": {...}}` or a flat object;
/// both shapes are accepted.
fn payload_of(msg: &JsonValue) -> &JsonValue {
    msg.get("payload").filter(|p| p.is_object()).unwrap_or(msg)
}

impl Actor for DeviceLinkWs {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            connection_id = %self.connection_id,
            "Device WebSocket connection started"
        );
        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(
            connection_id = %self.connection_id,
            device_id = ?self.identity,
            "Device WebSocket connection stopped"
        );

        if let Some(identity) = self.identity.take() {
            let released = self
                .sessions
                .release_if_current(&identity, self.connection_id);
            self.presence
                .connection_ended(identity, released, Utc::now());
        }
    }
}

impl Handler<PushFrame> for DeviceLinkWs {
    type Result = ();

    fn handle(&mut self, msg: PushFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for DeviceLinkWs {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_message(&text, ctx);
            }
            Ok(ws::Message::Binary(_)) => {
                debug!(
                    connection_id = %self.connection_id,
                    "Ignoring binary frame on device link"
                );
            }
            Ok(ws::Message::Close(reason)) => {
                info!(
                    connection_id = %self.connection_id,
                    reason = ?reason,
                    "WebSocket close message received"
                );
                ctx.stop();
            }
            Err(e) => {
                error!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "WebSocket protocol error"
                );
                ctx.stop();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_payload_of_nested_and_flat_shapes() {
        let nested = json!({"type": "register", "payload": {"deviceId": "dev-1"}});
        let flat = json!({"type": "register", "deviceId": "dev-1"});

        assert_eq!(
            payload_of(&nested).get("deviceId").and_then(|v| v.as_str()),
            Some("dev-1")
        );
        assert_eq!(
            payload_of(&flat).get("deviceId").and_then(|v| v.as_str()),
            Some("dev-1")
        );
    }

    #[test]
    fn test_payload_of_ignores_non_object_payload() {
        let msg = json!({"type": "register", "payload": "dev-1", "deviceId": "dev-2"});
        assert_eq!(
            payload_of(&msg).get("deviceId").and_then(|v| v.as_str()),
            Some("dev-2")
        );
    }
}
