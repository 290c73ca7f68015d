use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::change_bridge::{
    publish_change, ChangeEvent, ChangeOp, COLLECTION_NOTIFICATIONS,
};
use crate::services::identity::DeviceIdentity;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub device_id: String,
    pub sender: String,
    pub sender_number: String,
    pub receiver_number: String,
    pub title: String,
    pub body: String,
    pub sim_slot: i32,
    pub posted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub sender: String,
    pub sender_number: String,
    pub receiver_number: String,
    pub title: String,
    pub body: String,
    pub sim_slot: i32,
    pub posted_at: DateTime<Utc>,
}

const NOTIFICATION_COLUMNS: &str = "id, device_id, sender, sender_number, receiver_number, \
     title, body, sim_slot, posted_at, created_at";

#[derive(Clone)]
pub struct NotificationRepository {
    db_pool: Arc<PgPool>,
    feed_channel: String,
}

impl NotificationRepository {
    pub fn new(db_pool: Arc<PgPool>, feed_channel: String) -> Self {
        Self {
            db_pool,
            feed_channel,
        }
    }

    pub async fn insert_notification(
        &self,
        identity: &DeviceIdentity,
        data: NewNotification,
    ) -> Result<Notification, AppError> {
        let sql = format!(
            r#"
            INSERT INTO notifications (
                id, device_id, sender, sender_number, receiver_number, title, body, sim_slot, posted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );

        let notification = sqlx::query_as::<_, Notification>(&sql)
            .bind(Uuid::new_v4())
            .bind(identity.as_str())
            .bind(&data.sender)
            .bind(&data.sender_number)
            .bind(&data.receiver_number)
            .bind(&data.title)
            .bind(&data.body)
            .bind(data.sim_slot)
            .bind(data.posted_at)
            .fetch_one(&*self.db_pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to save notification: {}", e)))?;

        if let Ok(record) = serde_json::to_value(&notification) {
            let event =
                ChangeEvent::new(COLLECTION_NOTIFICATIONS, ChangeOp::Insert, Some(identity), record);
            if let Err(e) = publish_change(&self.db_pool, &self.feed_channel, &event).await {
                warn!(device_id = %identity, error = %e, "Failed to publish notification change");
            }
        }

        Ok(notification)
    }

    pub async fn list_all(&self, limit: i64) -> Result<Vec<Notification>, AppError> {
        let sql = format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS}
            FROM notifications
            ORDER BY created_at DESC
            LIMIT $1
            "#
        );

        sqlx::query_as::<_, Notification>(&sql)
            .bind(limit)
            .fetch_all(&*self.db_pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to fetch notifications: {}", e)))
    }

    pub async fn list_for_device(
        &self,
        identity: &DeviceIdentity,
        limit: i64,
    ) -> Result<Vec<Notification>, AppError> {
        let sql = format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS}
            FROM notifications
            WHERE device_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        );

        sqlx::query_as::<_, Notification>(&sql)
            .bind(identity.as_str())
            .bind(limit)
            .fetch_all(&*self.db_pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to fetch device notifications: {}", e)))
    }
}
