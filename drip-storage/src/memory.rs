//! In-memory run store for tests and local development

use crate::models::{BackfillRunBatchModel, BackfillRunModel};
use crate::store::{validate_batch, validate_pagination_params, validate_run, validate_transition, RunStore};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use drip_core::BackfillStatus;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    runs: HashMap<Uuid, BackfillRunModel>,
    batches: HashMap<Uuid, BackfillRunBatchModel>,
}

/// Run store guarded by a single mutex. Cloning shares the state.
#[derive(Clone, Default)]
pub struct InMemoryRunStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every batch of a run, ascending by start id
    pub fn batches_for(&self, run_id: Uuid) -> Vec<BackfillRunBatchModel> {
        let inner = self.inner.lock();
        let mut batches: Vec<BackfillRunBatchModel> = inner
            .batches
            .values()
            .filter(|b| b.backfill_run_id == run_id)
            .cloned()
            .collect();
        batches.sort_by_key(|b| b.start_id);
        batches
    }

    pub fn run_count(&self) -> usize {
        self.inner.lock().runs.len()
    }
}

fn stale(kind: &str, id: Uuid, expected: BackfillStatus, actual: &str) -> Error {
    Error::StaleStatus(format!(
        "{} {} is '{}', expected '{}'",
        kind, id, actual, expected
    ))
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert_run(&self, run: &BackfillRunModel) -> Result<()> {
        validate_run(run)?;
        let mut inner = self.inner.lock();
        if inner.runs.contains_key(&run.id) {
            return Err(Error::AlreadyExists(format!("Backfill run {}", run.id)));
        }
        inner.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<BackfillRunModel> {
        self.inner
            .lock()
            .runs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Backfill run {}", id)))
    }

    async fn list_runs(&self, limit: i64, offset: i64) -> Result<Vec<BackfillRunModel>> {
        validate_pagination_params(limit, offset)?;
        let inner = self.inner.lock();
        let mut runs: Vec<BackfillRunModel> = inner.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(runs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_runs(&self) -> Result<i64> {
        Ok(self.inner.lock().runs.len() as i64)
    }

    async fn transition_run_status(
        &self,
        id: Uuid,
        from: BackfillStatus,
        to: BackfillStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        validate_transition(from, to)?;
        let mut inner = self.inner.lock();
        let run = inner
            .runs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Backfill run {}", id)))?;

        if run.status != from.as_str() {
            return Err(stale("Backfill run", id, from, &run.status));
        }

        run.status = to.to_string();
        if to == BackfillStatus::Running {
            run.error_message = None;
        }
        if let Some(message) = error_message {
            run.error_message = Some(message.to_string());
        }
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn record_run_plan(&self, id: Uuid, total_count: i64, batch_size: i32) -> Result<()> {
        if batch_size <= 0 {
            return Err(Error::ValidationError(
                "Batch size must be greater than 0".to_string(),
            ));
        }
        let mut inner = self.inner.lock();
        let run = inner
            .runs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Backfill run {}", id)))?;
        run.total_count = Some(total_count);
        run.batch_size = batch_size;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_processed_count(&self, id: Uuid, by: i64) -> Result<i64> {
        let mut inner = self.inner.lock();
        let run = inner
            .runs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Backfill run {}", id)))?;
        run.processed_count += by;
        run.updated_at = Utc::now();
        Ok(run.processed_count)
    }

    async fn delete_run(&self, id: Uuid, expected: BackfillStatus) -> Result<()> {
        let mut inner = self.inner.lock();
        let run = inner
            .runs
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("Backfill run {}", id)))?;
        if run.status != expected.as_str() {
            return Err(stale("Backfill run", id, expected, &run.status));
        }

        inner.runs.remove(&id);
        inner.batches.retain(|_, batch| batch.backfill_run_id != id);
        Ok(())
    }

    async fn create_batches(&self, batches: &[BackfillRunBatchModel]) -> Result<()> {
        for batch in batches {
            validate_batch(batch)?;
        }

        let mut inner = self.inner.lock();
        for batch in batches {
            if !inner.runs.contains_key(&batch.backfill_run_id) {
                return Err(Error::NotFound(format!(
                    "Backfill run {}",
                    batch.backfill_run_id
                )));
            }
            if inner.batches.contains_key(&batch.id) {
                return Err(Error::AlreadyExists(format!("Backfill run batch {}", batch.id)));
            }
        }

        for batch in batches {
            inner.batches.insert(batch.id, batch.clone());
        }
        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> Result<BackfillRunBatchModel> {
        self.inner
            .lock()
            .batches
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Backfill run batch {}", id)))
    }

    async fn list_batches(
        &self,
        run_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BackfillRunBatchModel>> {
        validate_pagination_params(limit, offset)?;
        let mut batches = self.batches_for(run_id);
        batches.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.start_id.cmp(&a.start_id))
        });
        Ok(batches
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_batches(&self, run_id: Uuid) -> Result<i64> {
        let inner = self.inner.lock();
        Ok(inner
            .batches
            .values()
            .filter(|b| b.backfill_run_id == run_id)
            .count() as i64)
    }

    async fn count_incomplete_batches(&self, run_id: Uuid) -> Result<i64> {
        let inner = self.inner.lock();
        Ok(inner
            .batches
            .values()
            .filter(|b| {
                b.backfill_run_id == run_id && b.status != BackfillStatus::Completed.as_str()
            })
            .count() as i64)
    }

    async fn transition_batch_status(
        &self,
        id: Uuid,
        from: BackfillStatus,
        to: BackfillStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        validate_transition(from, to)?;
        let mut inner = self.inner.lock();
        let batch = inner
            .batches
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Backfill run batch {}", id)))?;

        if batch.status != from.as_str() {
            return Err(stale("Backfill run batch", id, from, &batch.status));
        }

        batch.status = to.to_string();
        if to == BackfillStatus::Running {
            batch.error_message = None;
        }
        if let Some(message) = error_message {
            batch.error_message = Some(message.to_string());
        }
        batch.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run() -> BackfillRunModel {
        BackfillRunModel::pending("AddRoleToEmployee", json!({"age": 25}), 2, None, Utc::now(), None)
    }

    #[tokio::test]
    async fn test_insert_and_get_run() {
        let store = InMemoryRunStore::new();
        let run = run();
        store.insert_run(&run).await.unwrap();

        let fetched = store.get_run(run.id).await.unwrap();
        assert_eq!(fetched.backfill_class_name, "AddRoleToEmployee");
        assert_eq!(fetched.status, "pending");
        assert!(matches!(
            store.insert_run(&run).await,
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            store.get_run(Uuid::new_v4()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_compare_and_set_transition() {
        let store = InMemoryRunStore::new();
        let run = run();
        store.insert_run(&run).await.unwrap();

        store
            .transition_run_status(run.id, BackfillStatus::Pending, BackfillStatus::Enqueued, None)
            .await
            .unwrap();

        let stale = store
            .transition_run_status(run.id, BackfillStatus::Pending, BackfillStatus::Enqueued, None)
            .await;
        assert!(matches!(stale, Err(Error::StaleStatus(_))));

        let invalid = store
            .transition_run_status(run.id, BackfillStatus::Enqueued, BackfillStatus::Completed, None)
            .await;
        assert!(matches!(invalid, Err(Error::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_failure_message_recorded_and_cleared_on_retry() {
        let store = InMemoryRunStore::new();
        let run = run();
        store.insert_run(&run).await.unwrap();
        let batch = BackfillRunBatchModel::pending(run.id, 1, 2, 2);
        store.create_batches(&[batch.clone()]).await.unwrap();

        for (from, to) in [
            (BackfillStatus::Pending, BackfillStatus::Enqueued),
            (BackfillStatus::Enqueued, BackfillStatus::Running),
        ] {
            store.transition_batch_status(batch.id, from, to, None).await.unwrap();
        }
        store
            .transition_batch_status(batch.id, BackfillStatus::Running, BackfillStatus::Failed, Some("boom"))
            .await
            .unwrap();
        assert_eq!(store.get_batch(batch.id).await.unwrap().error_message.as_deref(), Some("boom"));

        store
            .transition_batch_status(batch.id, BackfillStatus::Failed, BackfillStatus::Running, None)
            .await
            .unwrap();
        assert_eq!(store.get_batch(batch.id).await.unwrap().error_message, None);
    }

    #[tokio::test]
    async fn test_batches_are_created_atomically() {
        let store = InMemoryRunStore::new();
        let run = run();
        store.insert_run(&run).await.unwrap();

        let good = BackfillRunBatchModel::pending(run.id, 1, 2, 2);
        let bad = BackfillRunBatchModel::pending(run.id, 5, 3, 1);
        assert!(store.create_batches(&[good.clone(), bad]).await.is_err());
        assert_eq!(store.count_batches(run.id).await.unwrap(), 0);

        let orphan = BackfillRunBatchModel::pending(Uuid::new_v4(), 1, 1, 1);
        assert!(matches!(
            store.create_batches(&[good, orphan]).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(store.count_batches(run.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_and_incomplete_count() {
        let store = InMemoryRunStore::new();
        let run = run();
        store.insert_run(&run).await.unwrap();
        let batches = vec![
            BackfillRunBatchModel::pending(run.id, 1, 2, 2),
            BackfillRunBatchModel::pending(run.id, 3, 3, 1),
        ];
        store.create_batches(&batches).await.unwrap();
        assert_eq!(store.count_incomplete_batches(run.id).await.unwrap(), 2);

        assert_eq!(store.increment_processed_count(run.id, 2).await.unwrap(), 2);
        assert_eq!(store.increment_processed_count(run.id, 1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = InMemoryRunStore::new();
        let run = run();
        store.insert_run(&run).await.unwrap();

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                let id = run.id;
                tokio::spawn(async move { store.increment_processed_count(id, 5).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.get_run(run.id).await.unwrap().processed_count, 100);
    }

    #[tokio::test]
    async fn test_delete_requires_expected_status_and_cascades() {
        let store = InMemoryRunStore::new();
        let run = run();
        store.insert_run(&run).await.unwrap();
        store
            .create_batches(&[BackfillRunBatchModel::pending(run.id, 1, 2, 2)])
            .await
            .unwrap();

        assert!(matches!(
            store.delete_run(run.id, BackfillStatus::Enqueued).await,
            Err(Error::StaleStatus(_))
        ));

        store
            .transition_run_status(run.id, BackfillStatus::Pending, BackfillStatus::Enqueued, None)
            .await
            .unwrap();
        store.delete_run(run.id, BackfillStatus::Enqueued).await.unwrap();

        assert_eq!(store.run_count(), 0);
        assert!(store.batches_for(run.id).is_empty());
    }

    #[tokio::test]
    async fn test_list_runs_newest_first() {
        let store = InMemoryRunStore::new();
        let mut older = run();
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        let newer = run();
        store.insert_run(&older).await.unwrap();
        store.insert_run(&newer).await.unwrap();

        let runs = store.list_runs(10, 0).await.unwrap();
        assert_eq!(runs[0].id, newer.id);
        assert_eq!(runs[1].id, older.id);
        assert_eq!(store.list_runs(1, 1).await.unwrap()[0].id, older.id);
        assert_eq!(store.count_runs().await.unwrap(), 2);
    }
}
