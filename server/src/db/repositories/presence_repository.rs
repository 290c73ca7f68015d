use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::services::identity::DeviceIdentity;
use crate::services::presence_tracker::PresenceStore;

/// Persisted presence: one row per device, written exclusively by the
/// Presence Tracker.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub device_id: String,
    pub status: String,
    pub connectivity: String,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PresenceRepository {
    db_pool: Arc<PgPool>,
}

impl PresenceRepository {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    pub async fn find(&self, identity: &DeviceIdentity) -> Result<Option<PresenceRecord>, AppError> {
        sqlx::query_as::<_, PresenceRecord>(
            r#"
            SELECT device_id, status, connectivity, last_seen_at, updated_at
            FROM last_seen
            WHERE device_id = $1
            "#,
        )
        .bind(identity.as_str())
        .fetch_optional(&*self.db_pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to fetch last seen: {}", e)))
    }
}

#[async_trait]
impl PresenceStore for PresenceRepository {
    async fn upsert_presence(
        &self,
        identity: &DeviceIdentity,
        status: &str,
        connectivity: &str,
        last_seen_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO last_seen (device_id, status, connectivity, last_seen_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (device_id) DO UPDATE SET
                status = EXCLUDED.status,
                connectivity = EXCLUDED.connectivity,
                last_seen_at = EXCLUDED.last_seen_at,
                updated_at = NOW()
            "#,
        )
        .bind(identity.as_str())
        .bind(status)
        .bind(connectivity)
        .bind(last_seen_at)
        .execute(&*self.db_pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to upsert presence: {}", e)))?;

        Ok(())
    }
}
