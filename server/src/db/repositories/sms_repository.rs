use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;

use crate::error::AppError;
use crate::services::change_bridge::{
    publish_change, ChangeEvent, ChangeOp, COLLECTION_SMS_COMMANDS,
};
use crate::services::identity::DeviceIdentity;

/// The pending SMS command for a device: one row per device, newest command
/// replaces the previous one.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsCommand {
    pub device_id: String,
    #[serde(rename = "to")]
    pub to_number: String,
    pub body: String,
    pub sim_slot: i32,
    pub sent_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SmsRepository {
    db_pool: Arc<PgPool>,
    feed_channel: String,
}

impl SmsRepository {
    pub fn new(db_pool: Arc<PgPool>, feed_channel: String) -> Self {
        Self {
            db_pool,
            feed_channel,
        }
    }

    pub async fn upsert_command(
        &self,
        identity: &DeviceIdentity,
        to_number: &str,
        body: &str,
        sim_slot: i32,
        sent_at: DateTime<Utc>,
    ) -> Result<SmsCommand, AppError> {
        let command = sqlx::query_as::<_, SmsCommand>(
            r#"
            INSERT INTO sms_commands (device_id, to_number, body, sim_slot, sent_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (device_id) DO UPDATE SET
                to_number = EXCLUDED.to_number,
                body = EXCLUDED.body,
                sim_slot = EXCLUDED.sim_slot,
                sent_at = EXCLUDED.sent_at,
                updated_at = NOW()
            RETURNING device_id, to_number, body, sim_slot, sent_at, created_at, updated_at
            "#,
        )
        .bind(identity.as_str())
        .bind(to_number)
        .bind(body)
        .bind(sim_slot)
        .bind(sent_at)
        .fetch_one(&*self.db_pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to save SMS command: {}", e)))?;

        let op = if command.created_at == command.updated_at {
            ChangeOp::Insert
        } else {
            ChangeOp::Update
        };
        if let Ok(record) = serde_json::to_value(&command) {
            let event = ChangeEvent::new(COLLECTION_SMS_COMMANDS, op, Some(identity), record);
            if let Err(e) = publish_change(&self.db_pool, &self.feed_channel, &event).await {
                warn!(device_id = %identity, error = %e, "Failed to publish SMS command change");
            }
        }

        Ok(command)
    }

    pub async fn find_command(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Option<SmsCommand>, AppError> {
        sqlx::query_as::<_, SmsCommand>(
            r#"
            SELECT device_id, to_number, body, sim_slot, sent_at, created_at, updated_at
            FROM sms_commands
            WHERE device_id = $1
            "#,
        )
        .bind(identity.as_str())
        .fetch_optional(&*self.db_pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to fetch SMS command: {}", e)))
    }
}
