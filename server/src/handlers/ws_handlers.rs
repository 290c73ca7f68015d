use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::Duration;
use tracing::info;

use crate::config::AppSettings;
use crate::services::change_bridge::ChangeBridge;
use crate::services::dashboard_ws::DashboardWs;
use crate::services::device_link_ws::DeviceLinkWs;
use crate::services::presence_tracker::PresenceTracker;
use crate::services::session_registry::SessionRegistry;
use crate::services::watcher_registry::WatcherRegistry;

/// WebSocket endpoint for managed devices.
pub async fn device_ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    settings: web::Data<AppSettings>,
    sessions: web::Data<SessionRegistry>,
    presence: web::Data<PresenceTracker>,
    bridge: web::Data<ChangeBridge>,
) -> Result<HttpResponse, actix_web::Error> {
    info!("Starting device WebSocket connection");

    let actor = DeviceLinkWs::new(
        sessions.into_inner(),
        presence.into_inner(),
        bridge.into_inner(),
        Duration::from_secs(settings.presence.heartbeat_interval_secs),
        Duration::from_secs(settings.presence.client_timeout_secs),
    );

    ws::start(actor, &req, stream)
}

/// WebSocket endpoint for dashboard/observer clients.
pub async fn dashboard_ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    settings: web::Data<AppSettings>,
    watchers: web::Data<WatcherRegistry>,
) -> Result<HttpResponse, actix_web::Error> {
    info!("Starting dashboard WebSocket connection");

    let actor = DashboardWs::new(
        watchers.into_inner(),
        Duration::from_secs(settings.presence.heartbeat_interval_secs),
        Duration::from_secs(settings.presence.client_timeout_secs),
    );

    ws::start(actor, &req, stream)
}
