use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::change_bridge::{
    publish_change, ChangeEvent, ChangeOp, InstructionStore, COLLECTION_CALL_CODES,
    COLLECTION_CALL_FORWARD_LOGS,
};
use crate::services::identity::DeviceIdentity;

/// A call-forwarding instruction for one device and SIM slot. The most
/// recent active row is what the device receives on registration catch-up.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallCode {
    pub id: Uuid,
    pub device_id: String,
    pub code: String,
    #[serde(rename = "type")]
    pub code_type: String,
    pub sim_slot: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallForwardLog {
    pub id: Uuid,
    pub device_id: String,
    pub sim_slot: i32,
    pub status: String,
    pub action_by: String,
    pub created_at: DateTime<Utc>,
}

const CALL_CODE_COLUMNS: &str =
    "id, device_id, code, code_type, sim_slot, status, created_at, updated_at";

#[derive(Clone)]
pub struct CallCodeRepository {
    db_pool: Arc<PgPool>,
    feed_channel: String,
}

impl CallCodeRepository {
    pub fn new(db_pool: Arc<PgPool>, feed_channel: String) -> Self {
        Self {
            db_pool,
            feed_channel,
        }
    }

    async fn publish(&self, collection: &str, op: ChangeOp, identity: &DeviceIdentity, record: JsonValue) {
        let event = ChangeEvent::new(collection, op, Some(identity), record);
        if let Err(e) = publish_change(&self.db_pool, &self.feed_channel, &event).await {
            warn!(device_id = %identity, error = %e, "Failed to publish call code change");
        }
    }

    /// Upsert the instruction for one (device, SIM slot) pair and mark it
    /// active.
    pub async fn upsert_call_code(
        &self,
        identity: &DeviceIdentity,
        code: &str,
        code_type: &str,
        sim_slot: i32,
    ) -> Result<CallCode, AppError> {
        let sql = format!(
            r#"
            INSERT INTO call_codes (id, device_id, code, code_type, sim_slot, status)
            VALUES ($1, $2, $3, $4, $5, 'active')
            ON CONFLICT (device_id, sim_slot) DO UPDATE SET
                code = EXCLUDED.code,
                code_type = EXCLUDED.code_type,
                status = 'active',
                updated_at = NOW()
            RETURNING {CALL_CODE_COLUMNS}
            "#
        );

        let call_code = sqlx::query_as::<_, CallCode>(&sql)
            .bind(Uuid::new_v4())
            .bind(identity.as_str())
            .bind(code)
            .bind(code_type)
            .bind(sim_slot)
            .fetch_one(&*self.db_pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to save call code: {}", e)))?;

        let op = if call_code.created_at == call_code.updated_at {
            ChangeOp::Insert
        } else {
            ChangeOp::Update
        };
        if let Ok(record) = serde_json::to_value(&call_code) {
            self.publish(COLLECTION_CALL_CODES, op, identity, record).await;
        }

        Ok(call_code)
    }

    /// Most recent active instruction for a device across both SIM slots.
    pub async fn find_latest_call_code(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Option<CallCode>, AppError> {
        let sql = format!(
            r#"
            SELECT {CALL_CODE_COLUMNS}
            FROM call_codes
            WHERE device_id = $1 AND status = 'active'
            ORDER BY updated_at DESC
            LIMIT 1
            "#
        );

        sqlx::query_as::<_, CallCode>(&sql)
            .bind(identity.as_str())
            .fetch_optional(&*self.db_pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to fetch call code: {}", e)))
    }

    /// Record a call-forward enable/disable action for a device.
    pub async fn log_forward_action(
        &self,
        identity: &DeviceIdentity,
        sim_slot: i32,
        enabled: bool,
        action_by: &str,
    ) -> Result<CallForwardLog, AppError> {
        let status = if enabled { "enabled" } else { "disabled" };

        let log = sqlx::query_as::<_, CallForwardLog>(
            r#"
            INSERT INTO call_forward_logs (id, device_id, sim_slot, status, action_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, device_id, sim_slot, status, action_by, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(identity.as_str())
        .bind(sim_slot)
        .bind(status)
        .bind(action_by)
        .fetch_one(&*self.db_pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to log call forward action: {}", e)))?;

        if let Ok(record) = serde_json::to_value(&log) {
            self.publish(COLLECTION_CALL_FORWARD_LOGS, ChangeOp::Insert, identity, record)
                .await;
        }

        Ok(log)
    }
}

#[async_trait]
impl InstructionStore for CallCodeRepository {
    async fn find_latest(&self, identity: &DeviceIdentity) -> AppResult<Option<JsonValue>> {
        let latest = self.find_latest_call_code(identity).await?;
        match latest {
            Some(call_code) => Ok(Some(serde_json::to_value(&call_code)?)),
            None => Ok(None),
        }
    }
}
