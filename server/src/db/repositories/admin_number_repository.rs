use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;

use crate::error::AppError;
use crate::services::change_bridge::{
    publish_change, ChangeEvent, ChangeOp, COLLECTION_ADMIN_NUMBER,
};

/// Single-row admin forwarding configuration. `OFF` disables forwarding and
/// forces the number to "Inactive".
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminNumber {
    pub number: String,
    pub status: String,
}

#[derive(Clone)]
pub struct AdminNumberRepository {
    db_pool: Arc<PgPool>,
    feed_channel: String,
}

impl AdminNumberRepository {
    pub fn new(db_pool: Arc<PgPool>, feed_channel: String) -> Self {
        Self {
            db_pool,
            feed_channel,
        }
    }

    pub async fn get(&self) -> Result<Option<AdminNumber>, AppError> {
        sqlx::query_as::<_, AdminNumber>("SELECT number, status FROM admin_number WHERE id = 1")
            .fetch_optional(&*self.db_pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to fetch admin number: {}", e)))
    }

    pub async fn set(&self, number: &str, status: &str) -> Result<AdminNumber, AppError> {
        let admin_number = sqlx::query_as::<_, AdminNumber>(
            r#"
            INSERT INTO admin_number (id, number, status)
            VALUES (1, $1, $2)
            ON CONFLICT (id) DO UPDATE SET
                number = EXCLUDED.number,
                status = EXCLUDED.status,
                updated_at = NOW()
            RETURNING number, status
            "#,
        )
        .bind(number)
        .bind(status)
        .fetch_one(&*self.db_pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to set admin number: {}", e)))?;

        if let Ok(record) = serde_json::to_value(&admin_number) {
            let event = ChangeEvent::new(COLLECTION_ADMIN_NUMBER, ChangeOp::Update, None, record);
            if let Err(e) = publish_change(&self.db_pool, &self.feed_channel, &event).await {
                warn!(error = %e, "Failed to publish admin number change");
            }
        }

        Ok(admin_number)
    }
}
