use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::debug;

use crate::db::repositories::presence_repository::PresenceRepository;
use crate::error::{AppError, AppResult};
use crate::services::identity::DeviceIdentity;
use crate::services::presence_tracker::PresenceTracker;

#[derive(Debug, Deserialize)]
pub struct UpdateLastSeenBody {
    pub connectivity: String,
}

/// Fetch the persisted presence record for a device. Devices that never
/// connected get a synthetic inactive record instead of a 404.
pub async fn get_last_seen_handler(
    presence_repo: web::Data<PresenceRepository>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let identity = DeviceIdentity::normalize(&path.into_inner())?;

    match presence_repo.find(&identity).await? {
        Some(record) => Ok(HttpResponse::Ok().json(record)),
        None => Ok(HttpResponse::Ok().json(serde_json::json!({
            "deviceId": identity.as_str(),
            "status": "OFFLINE",
            "connectivity": "Offline",
            "lastSeenAt": null,
        }))),
    }
}

/// Explicit Online/Offline update from a client that cannot hold a
/// WebSocket open. Routed through the Presence Tracker so the persisted
/// record stays owned by one component.
pub async fn update_last_seen_handler(
    presence: web::Data<PresenceTracker>,
    path: web::Path<String>,
    req_body: web::Json<UpdateLastSeenBody>,
) -> AppResult<HttpResponse> {
    let identity = DeviceIdentity::normalize(&path.into_inner())?;

    if !["Online", "Offline"].contains(&req_body.connectivity.as_str()) {
        return Err(AppError::Validation(
            "connectivity must be 'Online' or 'Offline'".to_string(),
        ));
    }

    presence.heartbeat(&identity, &req_body.connectivity).await;

    debug!(
        device_id = %identity,
        connectivity = %req_body.connectivity,
        "Last seen updated via REST"
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "deviceId": identity.as_str(),
        "connectivity": req_body.connectivity,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_body_requires_connectivity() {
        assert!(serde_json::from_str::<UpdateLastSeenBody>("{}").is_err());
        let body: UpdateLastSeenBody =
            serde_json::from_str(r#"{"connectivity": "Online"}"#).unwrap();
        assert_eq!(body.connectivity, "Online");
    }
}
