//! Converters between storage models and runtime domain types.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use drip_core::{BackfillStatus, HookContext, HookScope, RecordId};
use drip_storage::{BackfillRunBatchModel, BackfillRunModel};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Domain representation of a run with typed status.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillRun {
    pub id: Uuid,
    pub backfill_class_name: String,
    pub options: Map<String, Value>,
    pub batch_size: u32,
    pub amount_of_elements: Option<u64>,
    pub start_at: DateTime<Utc>,
    pub status: BackfillStatus,
    pub total_count: Option<i64>,
    pub processed_count: i64,
    pub error_message: Option<String>,
    pub backfiller_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackfillRun {
    /// Hook context for moving this run to `status`
    pub fn hook_context(&self, status: BackfillStatus) -> HookContext {
        HookContext {
            scope: HookScope::Run,
            status,
            previous_status: self.status,
            run_id: self.id,
            batch_id: None,
            definition: self.backfill_class_name.clone(),
            batch_size: self.batch_size,
            start_id: None,
            finish_id: None,
            processed_count: self.processed_count,
            total_count: self.total_count,
            error_message: self.error_message.clone(),
        }
    }
}

impl TryFrom<BackfillRunModel> for BackfillRun {
    type Error = crate::Error;

    fn try_from(model: BackfillRunModel) -> Result<Self> {
        let status = parse_status(&model.status)?;
        let options = match model.options.0 {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::InvalidState(format!(
                    "run {} has non-object options: {}",
                    model.id, other
                )))
            }
        };
        let batch_size = u32::try_from(model.batch_size).map_err(|_| {
            Error::InvalidState(format!(
                "run {} has invalid batch size {}",
                model.id, model.batch_size
            ))
        })?;

        Ok(Self {
            id: model.id,
            backfill_class_name: model.backfill_class_name,
            options,
            batch_size,
            amount_of_elements: model.amount_of_elements.map(|n| n.max(0) as u64),
            start_at: model.start_at,
            status,
            total_count: model.total_count,
            processed_count: model.processed_count,
            error_message: model.error_message,
            backfiller_id: model.backfiller_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

/// Domain representation of a batch with typed status.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillRunBatch {
    pub id: Uuid,
    pub backfill_run_id: Uuid,
    pub start_id: RecordId,
    pub finish_id: RecordId,
    pub batch_size: u32,
    pub status: BackfillStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackfillRunBatch {
    /// Hook context for moving this batch of `run` to `status`
    pub fn hook_context(&self, run: &BackfillRun, status: BackfillStatus) -> HookContext {
        HookContext {
            scope: HookScope::Batch,
            status,
            previous_status: self.status,
            run_id: self.backfill_run_id,
            batch_id: Some(self.id),
            definition: run.backfill_class_name.clone(),
            batch_size: self.batch_size,
            start_id: Some(self.start_id),
            finish_id: Some(self.finish_id),
            processed_count: run.processed_count,
            total_count: run.total_count,
            error_message: self.error_message.clone(),
        }
    }
}

impl TryFrom<BackfillRunBatchModel> for BackfillRunBatch {
    type Error = crate::Error;

    fn try_from(model: BackfillRunBatchModel) -> Result<Self> {
        let status = parse_status(&model.status)?;
        let batch_size = u32::try_from(model.batch_size).map_err(|_| {
            Error::InvalidState(format!(
                "batch {} has invalid batch size {}",
                model.id, model.batch_size
            ))
        })?;

        Ok(Self {
            id: model.id,
            backfill_run_id: model.backfill_run_id,
            start_id: model.start_id,
            finish_id: model.finish_id,
            batch_size,
            status,
            error_message: model.error_message,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

fn parse_status(raw: &str) -> Result<BackfillStatus> {
    raw.parse::<BackfillStatus>()
        .map_err(|e| Error::InvalidState(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run_model() -> BackfillRunModel {
        BackfillRunModel::pending(
            "AddRoleToEmployee",
            json!({"age": 25}),
            100,
            Some(10),
            Utc::now(),
            Some("ops@example.com".to_string()),
        )
    }

    #[test]
    fn test_run_model_conversion() {
        let model = run_model();
        let run: BackfillRun = model.clone().try_into().expect("conversion should work");

        assert_eq!(run.id, model.id);
        assert_eq!(run.status, BackfillStatus::Pending);
        assert_eq!(run.batch_size, 100);
        assert_eq!(run.amount_of_elements, Some(10));
        assert_eq!(run.options.get("age"), Some(&json!(25)));

        let ctx = run.hook_context(BackfillStatus::Enqueued);
        assert_eq!(ctx.scope, HookScope::Run);
        assert_eq!(ctx.previous_status, BackfillStatus::Pending);
        assert_eq!(ctx.definition, "AddRoleToEmployee");
    }

    #[test]
    fn test_invalid_status_is_rejected() {
        let mut model = run_model();
        model.status = "bogus".to_string();

        let result: Result<BackfillRun> = model.try_into();
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_batch_model_conversion() {
        let run: BackfillRun = run_model().try_into().unwrap();
        let model = BackfillRunBatchModel::pending(run.id, 1, 50, 50);
        let batch: BackfillRunBatch = model.try_into().unwrap();

        assert_eq!(batch.backfill_run_id, run.id);
        assert_eq!((batch.start_id, batch.finish_id, batch.batch_size), (1, 50, 50));

        let ctx = batch.hook_context(&run, BackfillStatus::Running);
        assert_eq!(ctx.batch_id, Some(batch.id));
        assert_eq!(ctx.start_id, Some(1));
        assert_eq!(ctx.finish_id, Some(50));
    }
}
