use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::change_bridge::{
    publish_change, ChangeEvent, ChangeOp, COLLECTION_SIM_INFO,
};
use crate::services::identity::DeviceIdentity;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimInfo {
    pub id: Uuid,
    pub device_id: String,
    pub sim_slot: i32,
    pub carrier_name: Option<String>,
    pub country_iso: Option<String>,
    pub number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SimInfoRepository {
    db_pool: Arc<PgPool>,
    feed_channel: String,
}

impl SimInfoRepository {
    pub fn new(db_pool: Arc<PgPool>, feed_channel: String) -> Self {
        Self {
            db_pool,
            feed_channel,
        }
    }

    /// Upsert the reported SIM details for one (device, slot) pair.
    pub async fn upsert_sim_info(
        &self,
        identity: &DeviceIdentity,
        sim_slot: i32,
        carrier_name: Option<&str>,
        country_iso: Option<&str>,
        number: Option<&str>,
    ) -> Result<SimInfo, AppError> {
        let sim_info = sqlx::query_as::<_, SimInfo>(
            r#"
            INSERT INTO sim_info (id, device_id, sim_slot, carrier_name, country_iso, number)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (device_id, sim_slot) DO UPDATE SET
                carrier_name = EXCLUDED.carrier_name,
                country_iso = EXCLUDED.country_iso,
                number = EXCLUDED.number,
                updated_at = NOW()
            RETURNING id, device_id, sim_slot, carrier_name, country_iso, number, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(identity.as_str())
        .bind(sim_slot)
        .bind(carrier_name)
        .bind(country_iso)
        .bind(number)
        .fetch_one(&*self.db_pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to save SIM info: {}", e)))?;

        let op = if sim_info.created_at == sim_info.updated_at {
            ChangeOp::Insert
        } else {
            ChangeOp::Update
        };
        if let Ok(record) = serde_json::to_value(&sim_info) {
            let event = ChangeEvent::new(COLLECTION_SIM_INFO, op, Some(identity), record);
            if let Err(e) = publish_change(&self.db_pool, &self.feed_channel, &event).await {
                warn!(device_id = %identity, error = %e, "Failed to publish SIM info change");
            }
        }

        Ok(sim_info)
    }

    pub async fn list_for_device(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Vec<SimInfo>, AppError> {
        sqlx::query_as::<_, SimInfo>(
            r#"
            SELECT id, device_id, sim_slot, carrier_name, country_iso, number, created_at, updated_at
            FROM sim_info
            WHERE device_id = $1
            ORDER BY sim_slot
            "#,
        )
        .bind(identity.as_str())
        .fetch_all(&*self.db_pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to fetch SIM info: {}", e)))
    }
}
