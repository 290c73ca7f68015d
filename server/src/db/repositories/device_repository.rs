use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;

use crate::error::AppError;
use crate::services::change_bridge::{
    publish_change, ChangeEvent, ChangeOp, COLLECTION_DEVICES,
};
use crate::services::identity::DeviceIdentity;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub unique_id: String,
    pub model: String,
    pub manufacturer: String,
    pub brand: String,
    pub android_version: String,
    pub sim_operator: String,
    pub status: String,
    pub connectivity: String,
    pub battery_level: i32,
    pub is_charging: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RegisterDeviceData {
    pub model: String,
    pub manufacturer: String,
    pub brand: String,
    pub android_version: String,
    pub sim_operator: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Latest,
    Oldest,
}

const DEVICE_COLUMNS: &str = "unique_id, model, manufacturer, brand, android_version, sim_operator, \
     status, connectivity, battery_level, is_charging, last_seen_at, created_at, updated_at";

#[derive(Clone)]
pub struct DeviceRepository {
    db_pool: Arc<PgPool>,
    feed_channel: String,
}

impl DeviceRepository {
    pub fn new(db_pool: Arc<PgPool>, feed_channel: String) -> Self {
        Self {
            db_pool,
            feed_channel,
        }
    }

    async fn publish(&self, op: ChangeOp, identity: &DeviceIdentity, device: &Device) {
        let record = match serde_json::to_value(device) {
            Ok(record) => record,
            Err(e) => {
                warn!(device_id = %identity, error = %e, "Failed to serialize device record");
                return;
            }
        };
        let event = ChangeEvent::new(COLLECTION_DEVICES, op, Some(identity), record);
        if let Err(e) = publish_change(&self.db_pool, &self.feed_channel, &event).await {
            warn!(device_id = %identity, error = %e, "Failed to publish device change");
        }
    }

    /// Register a new device or refresh an existing record. Single
    /// idempotent upsert; the returned record distinguishes insert from
    /// update by its timestamps.
    pub async fn upsert_device(
        &self,
        identity: &DeviceIdentity,
        data: RegisterDeviceData,
    ) -> Result<Device, AppError> {
        let sql = format!(
            r#"
            INSERT INTO devices (
                unique_id, model, manufacturer, brand, android_version, sim_operator,
                status, connectivity, last_seen_at
            ) VALUES ($1, $2, $3, $4, $5, $6, 'ONLINE', 'Online', NOW())
            ON CONFLICT (unique_id) DO UPDATE SET
                model = EXCLUDED.model,
                manufacturer = EXCLUDED.manufacturer,
                brand = EXCLUDED.brand,
                android_version = EXCLUDED.android_version,
                sim_operator = EXCLUDED.sim_operator,
                status = 'ONLINE',
                connectivity = 'Online',
                last_seen_at = NOW(),
                updated_at = NOW()
            RETURNING {DEVICE_COLUMNS}
            "#
        );

        let device = sqlx::query_as::<_, Device>(&sql)
            .bind(identity.as_str())
            .bind(&data.model)
            .bind(&data.manufacturer)
            .bind(&data.brand)
            .bind(&data.android_version)
            .bind(&data.sim_operator)
            .fetch_one(&*self.db_pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to register device: {}", e)))?;

        // Inside one statement NOW() is constant, so a fresh insert leaves
        // created_at == updated_at.
        let op = if device.created_at == device.updated_at {
            ChangeOp::Insert
        } else {
            ChangeOp::Update
        };
        self.publish(op, identity, &device).await;

        Ok(device)
    }

    /// Update connectivity/battery fields reported by the device.
    pub async fn update_status(
        &self,
        identity: &DeviceIdentity,
        connectivity: &str,
        status: &str,
        battery_level: Option<i32>,
        is_charging: Option<bool>,
    ) -> Result<Option<Device>, AppError> {
        let sql = format!(
            r#"
            UPDATE devices
            SET
                connectivity = $2,
                status = $3,
                battery_level = COALESCE($4, battery_level),
                is_charging = COALESCE($5, is_charging),
                last_seen_at = NOW(),
                updated_at = NOW()
            WHERE unique_id = $1
            RETURNING {DEVICE_COLUMNS}
            "#
        );

        let device = sqlx::query_as::<_, Device>(&sql)
            .bind(identity.as_str())
            .bind(connectivity)
            .bind(status)
            .bind(battery_level)
            .bind(is_charging)
            .fetch_optional(&*self.db_pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to update device status: {}", e)))?;

        if let Some(ref device) = device {
            self.publish(ChangeOp::Update, identity, device).await;
        }

        Ok(device)
    }

    pub async fn find_device(&self, identity: &DeviceIdentity) -> Result<Option<Device>, AppError> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE unique_id = $1");

        sqlx::query_as::<_, Device>(&sql)
            .bind(identity.as_str())
            .fetch_optional(&*self.db_pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to fetch device: {}", e)))
    }

    /// List devices, optionally filtered by a free-text search across the
    /// identifying fields.
    pub async fn list_devices(
        &self,
        search: &str,
        sort: SortOrder,
    ) -> Result<Vec<Device>, AppError> {
        let order = match sort {
            SortOrder::Latest => "DESC",
            SortOrder::Oldest => "ASC",
        };
        let sql = format!(
            r#"
            SELECT {DEVICE_COLUMNS}
            FROM devices
            WHERE $1 = ''
               OR unique_id ILIKE $2
               OR brand ILIKE $2
               OR model ILIKE $2
               OR android_version ILIKE $2
            ORDER BY created_at {order}
            "#
        );
        let pattern = format!("%{}%", search);

        sqlx::query_as::<_, Device>(&sql)
            .bind(search)
            .bind(&pattern)
            .fetch_all(&*self.db_pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to fetch devices: {}", e)))
    }

    /// Mark devices Offline when their last heartbeat is older than the
    /// cutoff. Safety net behind the live presence tracking.
    pub async fn mark_stale_devices_offline(&self) -> Result<i64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE devices
            SET status = 'OFFLINE', connectivity = 'Offline', updated_at = NOW()
            WHERE status <> 'OFFLINE'
            AND last_seen_at < NOW() - INTERVAL '2 minutes'
            "#,
        )
        .execute(&*self.db_pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to mark stale devices offline: {}", e)))?;

        Ok(result.rows_affected() as i64)
    }
}
