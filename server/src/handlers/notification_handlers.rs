use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::db::repositories::notification_repository::{NewNotification, NotificationRepository};
use crate::error::{AppError, AppResult};
use crate::services::identity::DeviceIdentity;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveNotificationBody {
    pub device_id: String,
    pub receiver_number: String,
    pub body: String,
    pub sender: Option<String>,
    pub sender_number: Option<String>,
    pub title: Option<String>,
    pub sim_slot: Option<i32>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationListQuery {
    pub limit: Option<i64>,
}

/// Store a notification reported by a device.
pub async fn receive_notification_handler(
    notification_repo: web::Data<NotificationRepository>,
    req_body: web::Json<ReceiveNotificationBody>,
) -> AppResult<HttpResponse> {
    let identity = DeviceIdentity::normalize(&req_body.device_id)?;

    if req_body.receiver_number.trim().is_empty() || req_body.body.trim().is_empty() {
        return Err(AppError::Validation(
            "receiverNumber and body are required".to_string(),
        ));
    }

    let sim_slot = req_body.sim_slot.unwrap_or(0);
    if ![0, 1].contains(&sim_slot) {
        return Err(AppError::Validation("simSlot must be 0 or 1".to_string()));
    }

    let data = NewNotification {
        sender: req_body
            .sender
            .clone()
            .unwrap_or_else(|| "Unavailable".to_string()),
        sender_number: req_body
            .sender_number
            .clone()
            .unwrap_or_else(|| "Unavailable".to_string()),
        receiver_number: req_body.receiver_number.clone(),
        title: req_body.title.clone().unwrap_or_else(|| "New SMS".to_string()),
        body: req_body.body.clone(),
        sim_slot,
        posted_at: req_body.timestamp.unwrap_or_else(Utc::now),
    };

    let notification = notification_repo
        .insert_notification(&identity, data)
        .await?;

    Ok(HttpResponse::Created().json(notification))
}

/// Latest notifications across all devices (default 50, capped at 200).
pub async fn get_all_notifications_handler(
    notification_repo: web::Data<NotificationRepository>,
    query: web::Query<NotificationListQuery>,
) -> AppResult<HttpResponse> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    let notifications = notification_repo.list_all(limit).await?;

    debug!(count = notifications.len(), "Fetched notifications");

    Ok(HttpResponse::Ok().json(serde_json::json!({ "data": notifications })))
}

/// Latest notifications for one device (default 3, capped at 50).
pub async fn get_device_notifications_handler(
    notification_repo: web::Data<NotificationRepository>,
    path: web::Path<String>,
    query: web::Query<NotificationListQuery>,
) -> AppResult<HttpResponse> {
    let identity = DeviceIdentity::normalize(&path.into_inner())?;
    let limit = query.limit.unwrap_or(3).clamp(1, 50);

    let notifications = notification_repo.list_for_device(&identity, limit).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "data": notifications })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_receive_body_minimal() {
        let body: ReceiveNotificationBody = serde_json::from_str(
            r#"{"deviceId": "dev-1", "receiverNumber": "+15550100", "body": "otp 123456"}"#,
        )
        .unwrap();
        assert_eq!(body.device_id, "dev-1");
        assert!(body.sender.is_none());
        assert!(body.sim_slot.is_none());
    }
}
