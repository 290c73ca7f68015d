use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::repositories::device_repository::{
    DeviceRepository, RegisterDeviceData, SortOrder,
};
use crate::error::{AppError, AppResult};
use crate::services::identity::DeviceIdentity;
use crate::services::presence_tracker::{derive_status, PresenceTracker};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequestBody {
    pub unique_id: Option<String>,
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub brand: Option<String>,
    pub android_version: Option<String>,
    pub sim_operator: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceResponse {
    pub device_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequestBody {
    pub device_id: String,
    pub battery_level: Option<i32>,
    pub is_charging: Option<bool>,
    pub connectivity: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListDevicesQuery {
    #[serde(default)]
    pub search: String,
    pub sort: Option<String>,
}

/// Generate an identity for devices that register without one.
fn generate_device_id() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::rng();
    let suffix: String = (0..6)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect();
    format!("DEV-{}", suffix)
}

/// Register a new device or refresh an existing record
pub async fn register_device_handler(
    device_repo: web::Data<DeviceRepository>,
    req_body: web::Json<RegisterDeviceRequestBody>,
) -> AppResult<HttpResponse> {
    let raw_id = match req_body.unique_id.as_deref() {
        Some(raw) if !raw.trim().is_empty() => raw.to_string(),
        _ => generate_device_id(),
    };
    let identity = DeviceIdentity::normalize(&raw_id)?;

    let data = RegisterDeviceData {
        model: req_body.model.clone().unwrap_or_else(|| "Unknown".to_string()),
        manufacturer: req_body
            .manufacturer
            .clone()
            .unwrap_or_else(|| "Unknown".to_string()),
        brand: req_body.brand.clone().unwrap_or_else(|| "Unknown".to_string()),
        android_version: req_body
            .android_version
            .clone()
            .unwrap_or_else(|| "Unknown".to_string()),
        sim_operator: req_body
            .sim_operator
            .clone()
            .unwrap_or_else(|| "Unavailable".to_string()),
    };

    let device = device_repo.upsert_device(&identity, data).await?;
    let created = device.created_at == device.updated_at;

    info!(
        device_id = %identity,
        model = %device.model,
        created = created,
        "Device registered"
    );

    let response = RegisterDeviceResponse {
        device_id: device.unique_id,
        status: device.status,
        created_at: device.created_at,
        updated_at: device.updated_at,
    };

    if created {
        Ok(HttpResponse::Created().json(response))
    } else {
        Ok(HttpResponse::Ok().json(response))
    }
}

/// Update device connectivity and battery state
pub async fn update_status_handler(
    device_repo: web::Data<DeviceRepository>,
    presence: web::Data<PresenceTracker>,
    req_body: web::Json<UpdateStatusRequestBody>,
) -> AppResult<HttpResponse> {
    let identity = DeviceIdentity::normalize(&req_body.device_id)?;
    let connectivity = req_body
        .connectivity
        .clone()
        .unwrap_or_else(|| "Unknown".to_string());
    let status = derive_status(&connectivity);

    let device = device_repo
        .update_status(
            &identity,
            &connectivity,
            status,
            req_body.battery_level,
            req_body.is_charging,
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Device not found".to_string()))?;

    // The REST status path feeds the same presence pipeline as a WS
    // heartbeat, so transitions are identical regardless of transport.
    presence.heartbeat(&identity, &connectivity).await;

    debug!(
        device_id = %identity,
        connectivity = %connectivity,
        status = %status,
        "Device status updated"
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "deviceId": device.unique_id,
        "status": device.status,
        "connectivity": device.connectivity,
        "updatedAt": device.updated_at,
    })))
}

/// List devices with optional search and sort
pub async fn get_devices_handler(
    device_repo: web::Data<DeviceRepository>,
    query: web::Query<ListDevicesQuery>,
) -> AppResult<HttpResponse> {
    let sort = match query.sort.as_deref() {
        Some("oldest") => SortOrder::Oldest,
        _ => SortOrder::Latest,
    };

    let devices = device_repo.list_devices(query.search.trim(), sort).await?;

    debug!(device_count = devices.len(), "Retrieved device list");

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "total": devices.len(),
        "data": devices,
    })))
}

/// Fetch one device by identity
pub async fn get_device_handler(
    device_repo: web::Data<DeviceRepository>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let identity = DeviceIdentity::normalize(&path.into_inner())?;

    let device = device_repo
        .find_device(&identity)
        .await?
        .ok_or_else(|| AppError::NotFound("Device not found".to_string()))?;

    Ok(HttpResponse::Ok().json(device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_generated_device_id_shape() {
        let id = generate_device_id();
        assert!(id.starts_with("DEV-"));
        assert_eq!(id.len(), 10);
        // Generated ids survive normalization untouched apart from casing.
        let identity = DeviceIdentity::normalize(&id).unwrap();
        assert_eq!(identity.as_str(), id.to_lowercase());
    }

    #[test]
    fn test_register_body_accepts_minimal_payload() {
        let body: RegisterDeviceRequestBody = serde_json::from_str("{}").unwrap();
        assert!(body.unique_id.is_none());
        assert!(body.model.is_none());
    }

    #[test]
    fn test_status_body_deserializes_camel_case() {
        let body: UpdateStatusRequestBody = serde_json::from_str(
            r#"{"deviceId": "dev-1", "batteryLevel": 80, "isCharging": true, "connectivity": "Online"}"#,
        )
        .unwrap();
        assert_eq!(body.device_id, "dev-1");
        assert_eq!(body.battery_level, Some(80));
        assert_eq!(body.is_charging, Some(true));
    }
}
