use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::db::repositories::sms_repository::SmsRepository;
use crate::error::{AppError, AppResult};
use crate::services::identity::DeviceIdentity;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSmsBody {
    pub to: String,
    pub body: String,
    pub sim_slot: Option<i32>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Fetch the pending SMS command for a device.
pub async fn get_sms_handler(
    sms_repo: web::Data<SmsRepository>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let identity = DeviceIdentity::normalize(&path.into_inner())?;

    let command = sms_repo.find_command(&identity).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "data": command })))
}

/// Issue an SMS command for a device; one pending command per device, the
/// newest replaces any previous one.
pub async fn send_sms_handler(
    sms_repo: web::Data<SmsRepository>,
    path: web::Path<String>,
    req_body: web::Json<SendSmsBody>,
) -> AppResult<HttpResponse> {
    let identity = DeviceIdentity::normalize(&path.into_inner())?;

    if req_body.to.trim().is_empty() || req_body.body.trim().is_empty() {
        return Err(AppError::Validation("to and body are required".to_string()));
    }

    let sim_slot = req_body.sim_slot.unwrap_or(0);
    if ![0, 1].contains(&sim_slot) {
        return Err(AppError::Validation("simSlot must be 0 or 1".to_string()));
    }

    let sent_at = req_body.timestamp.unwrap_or_else(Utc::now);
    let command = sms_repo
        .upsert_command(&identity, req_body.to.trim(), &req_body.body, sim_slot, sent_at)
        .await?;

    info!(device_id = %identity, "SMS command saved");

    Ok(HttpResponse::Ok().json(command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_send_sms_body_defaults() {
        let body: SendSmsBody =
            serde_json::from_str(r#"{"to": "+15550100", "body": "hello"}"#).unwrap();
        assert_eq!(body.to, "+15550100");
        assert!(body.sim_slot.is_none());
        assert!(body.timestamp.is_none());
    }
}
