//! Run store abstraction
//!
//! Persistence operations needed by the run and batch state machines. Status
//! changes are compare-and-set: `transition_*_status` only succeeds when the
//! stored status still equals `from`, otherwise it fails with
//! [`Error::StaleStatus`](crate::Error::StaleStatus).

use crate::models::{BackfillRunBatchModel, BackfillRunModel};
use crate::{Error, Result};
use async_trait::async_trait;
use drip_core::BackfillStatus;
use uuid::Uuid;

/// Storage of backfill runs and their batches
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a new run
    async fn insert_run(&self, run: &BackfillRunModel) -> Result<()>;

    /// Get a run by ID (`NotFound` when absent)
    async fn get_run(&self, id: Uuid) -> Result<BackfillRunModel>;

    /// List runs, newest first
    async fn list_runs(&self, limit: i64, offset: i64) -> Result<Vec<BackfillRunModel>>;

    async fn count_runs(&self) -> Result<i64>;

    /// Compare-and-set the run status; `error_message` is recorded when given
    async fn transition_run_status(
        &self,
        id: Uuid,
        from: BackfillStatus,
        to: BackfillStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Record the outcome of planning: total count and effective batch size
    async fn record_run_plan(&self, id: Uuid, total_count: i64, batch_size: i32) -> Result<()>;

    /// Atomically add `by` to the run's processed count, returning the new value
    async fn increment_processed_count(&self, id: Uuid, by: i64) -> Result<i64>;

    /// Delete a run and its batches if it is still in `expected` status
    async fn delete_run(&self, id: Uuid, expected: BackfillStatus) -> Result<()>;

    /// Persist all batches of a run, all or nothing
    async fn create_batches(&self, batches: &[BackfillRunBatchModel]) -> Result<()>;

    /// Get a batch by ID (`NotFound` when absent)
    async fn get_batch(&self, id: Uuid) -> Result<BackfillRunBatchModel>;

    /// List the batches of a run, newest first
    async fn list_batches(
        &self,
        run_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BackfillRunBatchModel>>;

    async fn count_batches(&self, run_id: Uuid) -> Result<i64>;

    /// Count the batches of a run that are not `completed`
    async fn count_incomplete_batches(&self, run_id: Uuid) -> Result<i64>;

    /// Compare-and-set the batch status; `error_message` is recorded when given
    async fn transition_batch_status(
        &self,
        id: Uuid,
        from: BackfillStatus,
        to: BackfillStatus,
        error_message: Option<&str>,
    ) -> Result<()>;
}

/// Validate a status transition against the shared transition table
pub(crate) fn validate_transition(from: BackfillStatus, to: BackfillStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::ValidationError(format!(
            "Invalid backfill status transition: {} -> {}",
            from, to
        )))
    }
}

/// Validate pagination parameters
pub(crate) fn validate_pagination_params(limit: i64, offset: i64) -> Result<()> {
    if limit <= 0 {
        return Err(Error::ValidationError(
            "Limit must be greater than 0".to_string(),
        ));
    }
    if limit > 1000 {
        return Err(Error::ValidationError(
            "Limit cannot exceed 1000".to_string(),
        ));
    }
    if offset < 0 {
        return Err(Error::ValidationError(
            "Offset must be non-negative".to_string(),
        ));
    }
    Ok(())
}

/// Validate a run before insertion
pub(crate) fn validate_run(run: &BackfillRunModel) -> Result<()> {
    if run.backfill_class_name.trim().is_empty() {
        return Err(Error::ValidationError(
            "Backfill class name cannot be empty".to_string(),
        ));
    }
    if run.batch_size <= 0 {
        return Err(Error::ValidationError(
            "Batch size must be greater than 0".to_string(),
        ));
    }
    if matches!(run.amount_of_elements, Some(n) if n < 0) {
        return Err(Error::ValidationError(
            "Amount of elements must be non-negative".to_string(),
        ));
    }
    run.status.parse::<BackfillStatus>().map_err(|e| Error::ValidationError(e.to_string()))?;
    Ok(())
}

/// Validate a batch before insertion
pub(crate) fn validate_batch(batch: &BackfillRunBatchModel) -> Result<()> {
    if batch.finish_id < batch.start_id {
        return Err(Error::ValidationError(format!(
            "Batch finish_id {} is before start_id {}",
            batch.finish_id, batch.start_id
        )));
    }
    if batch.batch_size <= 0 {
        return Err(Error::ValidationError(
            "Batch size must be greater than 0".to_string(),
        ));
    }
    batch.status.parse::<BackfillStatus>().map_err(|e| Error::ValidationError(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_transition_validation() {
        assert!(validate_transition(BackfillStatus::Pending, BackfillStatus::Enqueued).is_ok());
        assert!(matches!(
            validate_transition(BackfillStatus::Completed, BackfillStatus::Running),
            Err(Error::ValidationError(_))
        ));
    }

    #[test]
    fn test_pagination_validation() {
        assert!(validate_pagination_params(10, 0).is_ok());
        assert!(validate_pagination_params(0, 0).is_err());
        assert!(validate_pagination_params(1001, 0).is_err());
        assert!(validate_pagination_params(10, -1).is_err());
    }

    #[test]
    fn test_run_and_batch_validation() {
        let mut run = BackfillRunModel::pending(
            "AddRoleToEmployee",
            serde_json::json!({}),
            100,
            None,
            Utc::now(),
            None,
        );
        assert!(validate_run(&run).is_ok());
        run.batch_size = 0;
        assert!(validate_run(&run).is_err());

        let batch = BackfillRunBatchModel::pending(run.id, 10, 5, 3);
        assert!(validate_batch(&batch).is_err());
    }
}
