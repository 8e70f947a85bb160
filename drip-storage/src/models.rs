//! Database models for backfill runs and batches

use chrono::{DateTime, Utc};
use drip_core::{BackfillStatus, RecordId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Backfill run model for database storage
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BackfillRunModel {
    pub id: Uuid,
    pub backfill_class_name: String,
    pub options: sqlx::types::Json<serde_json::Value>,
    pub batch_size: i32,
    pub amount_of_elements: Option<i64>,
    pub start_at: DateTime<Utc>,
    pub status: String,
    pub total_count: Option<i64>,
    pub processed_count: i64,
    pub error_message: Option<String>,
    pub backfiller_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackfillRunModel {
    /// New `pending` run
    pub fn pending(
        backfill_class_name: impl Into<String>,
        options: serde_json::Value,
        batch_size: i32,
        amount_of_elements: Option<i64>,
        start_at: DateTime<Utc>,
        backfiller_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            backfill_class_name: backfill_class_name.into(),
            options: sqlx::types::Json(options),
            batch_size,
            amount_of_elements,
            start_at,
            status: BackfillStatus::Pending.to_string(),
            total_count: None,
            processed_count: 0,
            error_message: None,
            backfiller_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Backfill run batch model for database storage
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BackfillRunBatchModel {
    pub id: Uuid,
    pub backfill_run_id: Uuid,
    pub start_id: i64,
    pub finish_id: i64,
    pub batch_size: i32,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackfillRunBatchModel {
    /// New `pending` batch covering `[start_id, finish_id]`
    pub fn pending(backfill_run_id: Uuid, start_id: RecordId, finish_id: RecordId, batch_size: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            backfill_run_id,
            start_id,
            finish_id,
            batch_size,
            status: BackfillStatus::Pending.to_string(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}
