//! WebSocket actor for dashboard/observer connections.
//!
//! A dashboard connection joins the global broadcast pool on connect and may
//! subscribe to live events for individual devices with watch/unwatch. It
//! never registers as a device; with respect to the Session Registry it
//! stays unidentified for its whole life.

use actix::prelude::*;
use actix_web_actors::ws;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::services::connection::{ConnectionHandle, PushFrame};
use crate::services::identity::DeviceIdentity;
use crate::services::watcher_registry::WatcherRegistry;

pub struct DashboardWs {
    connection_id: Uuid,
    last_heartbeat: Instant,
    watchers: Arc<WatcherRegistry>,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl DashboardWs {
    pub fn new(
        watchers: Arc<WatcherRegistry>,
        heartbeat_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            last_heartbeat: Instant::now(),
            watchers,
            heartbeat_interval,
            client_timeout,
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(
                    connection_id = %act.connection_id,
                    "Dashboard heartbeat failed, disconnecting"
                );
                ctx.stop();
                return;
            }

            ctx.ping(b"heartbeat");
        });
    }

    fn send_error(&self, code: &str, message: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let error_response = json!({
            "type": "error",
            "code": code,
            "message": message,
            "timestamp": Utc::now(),
        });

        ctx.text(error_response.to_string());
    }

    fn handle_message(&mut self, msg: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let parsed: JsonValue = match serde_json::from_str(msg) {
            Ok(json) => json,
            Err(_) => {
                warn!(
                    connection_id = %self.connection_id,
                    "Failed to parse dashboard WebSocket message"
                );
                self.send_error("invalid_json", "Invalid JSON format", ctx);
                return;
            }
        };

        let message_type = parsed
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        match message_type {
            "watch" => self.handle_watch(&parsed, true, ctx),
            "unwatch" => self.handle_watch(&parsed, false, ctx),
            "ping" => {
                let pong = json!({ "type": "pong" });
                ctx.text(pong.to_string());
            }
            "pong" => {}
            _ => {
                warn!(
                    connection_id = %self.connection_id,
                    message_type = %message_type,
                    "Unknown dashboard message type received"
                );
                self.send_error(
                    "unknown_message_type",
                    &format!("Unknown message type: {}", message_type),
                    ctx,
                );
            }
        }
    }

    fn handle_watch(&mut self, msg: &JsonValue, watch: bool, ctx: &mut ws::WebsocketContext<Self>) {
        let payload = msg.get("payload").filter(|p| p.is_object()).unwrap_or(msg);

        let raw_id = match payload.get("deviceId").and_then(|v| v.as_str()) {
            Some(id) => id,
            None => {
                self.send_error("missing_device_id", "Device ID is required", ctx);
                return;
            }
        };

        let identity = match DeviceIdentity::normalize(raw_id) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "Watch request carried an invalid device identity; dropping"
                );
                self.send_error("invalid_identity", "Device ID is not usable", ctx);
                return;
            }
        };

        if watch {
            let handle = ConnectionHandle::new(self.connection_id, ctx.address().recipient());
            self.watchers.add_watcher(&identity, handle);
        } else {
            self.watchers.remove_watcher(&identity, self.connection_id);
        }

        debug!(
            connection_id = %self.connection_id,
            device_id = %identity,
            watching = watch,
            "Watch subscription updated"
        );

        let ack = json!({
            "type": if watch { "watching" } else { "unwatched" },
            "payload": { "deviceId": identity.as_str() },
        });
        ctx.text(ack.to_string());
    }
}

impl Actor for DashboardWs {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            connection_id = %self.connection_id,
            "Dashboard WebSocket connection started"
        );
        let handle = ConnectionHandle::new(self.connection_id, ctx.address().recipient());
        self.watchers.add_dashboard(handle);
        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(
            connection_id = %self.connection_id,
            "Dashboard WebSocket connection stopped"
        );
        self.watchers.remove_handle_everywhere(self.connection_id);
    }
}

impl Handler<PushFrame> for DashboardWs {
    type Result = ();

    fn handle(&mut self, msg: PushFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for DashboardWs {
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
            Ok(ws::Message::Close(reason)) => {
                info!(
                    connection_id = %self.connection_id,
                    reason = ?reason,
                    "Dashboard WebSocket close message received"
                );
                ctx.stop();
            }
            Err(e) => {
                error!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "Dashboard WebSocket protocol error"
                );
                ctx.stop();
            }
            _ => {}
        }
    }
}
