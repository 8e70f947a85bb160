//! Batch lifecycle
//!
//! A batch is created `pending` by its run's planning step, enqueued on the
//! child queue by its commit step and processed by
//! [`BatchStateMachine::execute`], which reports completion back to the run.

use crate::batch_executor::BatchExecutor;
use crate::converters::{BackfillRun, BackfillRunBatch};
use crate::hooks::TransitionOutcome;
use crate::pager::KeysetPager;
use crate::queue::WorkItem;
use crate::run_machine::RunStateMachine;
use crate::services::{map_storage_error, Services};
use crate::{Error, Result};
use drip_core::{BackfillDefinition, BackfillStatus, ProcessContext};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// State machine for the batches of a run
#[derive(Clone)]
pub struct BatchStateMachine {
    services: Arc<Services>,
    executor: BatchExecutor,
}

impl BatchStateMachine {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            executor: BatchExecutor::new(),
        }
    }

    /// Use `executor` to process pages instead of the default one
    pub fn with_executor(mut self, executor: BatchExecutor) -> Self {
        self.executor = executor;
        self
    }

    fn runs(&self) -> RunStateMachine {
        RunStateMachine::new(self.services.clone())
    }

    /// Load a batch by id
    pub async fn load(&self, batch_id: Uuid) -> Result<BackfillRunBatch> {
        self.services
            .runs
            .get_batch(batch_id)
            .await
            .map_err(|e| map_storage_error(e, "Failed to load batch"))?
            .try_into()
    }

    /// Enqueue a `pending` batch on the child queue and mark it `enqueued`
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn on_commit(&self, batch_id: Uuid) -> Result<()> {
        let batch = self.load(batch_id).await?;
        if batch.status != BackfillStatus::Pending {
            return Ok(());
        }
        let run = self.runs().load(batch.backfill_run_id).await?;

        let services = &self.services;
        let mutation: BoxFuture<'_, Result<()>> = Box::pin(async move {
            let handle = services
                .queue
                .enqueue(
                    &services.config.child_queue_name,
                    WorkItem::DripBatch { batch_id },
                    None,
                )
                .await?;
            services
                .runs
                .transition_batch_status(batch_id, BackfillStatus::Pending, BackfillStatus::Enqueued, None)
                .await
                .map_err(|e| map_storage_error(e, "Failed to mark batch enqueued"))?;
            tracing::debug!(batch_id = %batch_id, handle = %handle, "Batch enqueued");
            Ok(())
        });

        self.dispatch(&run, &batch, BackfillStatus::Enqueued, mutation)
            .await
            .map(|_| ())
    }

    /// Process the batch.
    ///
    /// Batches of a stopped run are marked `stopped` without processing.
    /// Missing and finished batches are skipped. `failed` batches are processed
    /// again, and so are `running` ones: a redelivered `running` batch belongs
    /// to a worker that died mid-batch and is retried as a whole. A processing
    /// error marks the batch `failed` and is returned; the run stays `running`.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn execute(&self, batch_id: Uuid) -> Result<()> {
        let batch = match self.load(batch_id).await {
            Ok(batch) => batch,
            Err(Error::NotFound(_)) => {
                info!("Batch no longer exists, skipping");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match batch.status {
            BackfillStatus::Enqueued | BackfillStatus::Failed => {}
            BackfillStatus::Running => {
                warn!("Batch redelivered while running, retrying the whole batch");
            }
            status => {
                warn!(status = %status, "Batch is not runnable, skipping");
                return Ok(());
            }
        }

        let run = self.runs().load(batch.backfill_run_id).await?;
        if run.status == BackfillStatus::Stopped {
            return self.stop(&run, &batch).await;
        }

        let outcome = match self.process(&run, &batch).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(run_id = %run.id, error = %e, "Batch failed");
                self.fail(&run, batch_id, &e).await;
                return Err(e);
            }
        };
        if !outcome.is_applied() {
            return Ok(());
        }

        let batch = self.load(batch_id).await?;
        let run = self.runs().load(batch.backfill_run_id).await?;
        let services = &self.services;
        let mutation: BoxFuture<'_, Result<()>> = Box::pin(async move {
            services
                .runs
                .transition_batch_status(batch_id, BackfillStatus::Running, BackfillStatus::Completed, None)
                .await
                .map_err(|e| map_storage_error(e, "Failed to mark batch completed"))
        });
        let outcome = self
            .dispatch(&run, &batch, BackfillStatus::Completed, mutation)
            .await?;
        if !outcome.is_applied() {
            return Ok(());
        }
        info!(run_id = %run.id, records = batch.batch_size, "Batch completed");

        if let Err(e) = self.runs().on_batch_completed(run.id, batch.batch_size).await {
            error!(run_id = %run.id, error = %e, "Failed to record batch completion on run");
        }
        Ok(())
    }

    /// Mark the batch `running` and process its id range page by page.
    ///
    /// A batch that is already `running` keeps its status and is reprocessed.
    async fn process(&self, run: &BackfillRun, batch: &BackfillRunBatch) -> Result<TransitionOutcome> {
        let definition = self.runs().definition(&run.backfill_class_name)?;
        let services = &self.services;
        let executor = &self.executor;
        let from = batch.status;
        let batch_id = batch.id;

        let mutation: BoxFuture<'_, Result<()>> = Box::pin(async move {
            if from != BackfillStatus::Running {
                services
                    .runs
                    .transition_batch_status(batch_id, from, BackfillStatus::Running, None)
                    .await
                    .map_err(|e| map_storage_error(e, "Failed to mark batch running"))?;
            }

            services.config.run_before_backfill()?;
            let instance = self.runs().instance(&definition, run, run.batch_size)?;
            let scope = instance
                .scope()?
                .restrict_to_range(batch.start_id, batch.finish_id);

            let ctx = ProcessContext {
                store: services.records.as_ref(),
                options: instance.options(),
                run_id: run.id,
                batch_id,
            };
            let page_size = instance.batch_size().max(1) as usize;
            let mut pager = KeysetPager::new(services.records.as_ref(), scope, page_size);

            let mut processed = 0;
            while let Some(page) = pager.next_page().await? {
                processed += executor.execute_page(&instance, &ctx, &page).await?;
            }
            tracing::debug!(processed, "Batch processed");
            Ok(())
        });

        self.dispatch(run, batch, BackfillStatus::Running, mutation).await
    }

    async fn stop(&self, run: &BackfillRun, batch: &BackfillRunBatch) -> Result<()> {
        if !batch.status.can_transition_to(BackfillStatus::Stopped) {
            warn!(status = %batch.status, "Run is stopped, leaving batch as is");
            return Ok(());
        }

        let services = &self.services;
        let batch_id = batch.id;
        let from = batch.status;
        let mutation: BoxFuture<'_, Result<()>> = Box::pin(async move {
            services
                .runs
                .transition_batch_status(batch_id, from, BackfillStatus::Stopped, None)
                .await
                .map_err(|e| map_storage_error(e, "Failed to mark batch stopped"))
        });

        self.dispatch(run, batch, BackfillStatus::Stopped, mutation)
            .await?;
        info!(run_id = %run.id, "Run is stopped, batch stopped without processing");
        Ok(())
    }

    /// Mark the batch `failed` with the error's message. Errors while failing
    /// are logged, the original error is what callers see.
    async fn fail(&self, run: &BackfillRun, batch_id: Uuid, cause: &Error) {
        let batch = match self.load(batch_id).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(batch_id = %batch_id, error = %e, "Failed to load batch to mark it failed");
                return;
            }
        };
        if !batch.status.can_transition_to(BackfillStatus::Failed) {
            return;
        }

        let message = cause.to_string();
        let services = &self.services;
        let from = batch.status;
        let error_message = message.as_str();
        let mutation: BoxFuture<'_, Result<()>> = Box::pin(async move {
            services
                .runs
                .transition_batch_status(batch_id, from, BackfillStatus::Failed, Some(error_message))
                .await
                .map_err(|e| map_storage_error(e, "Failed to mark batch failed"))
        });

        let mut batch = batch;
        batch.error_message = Some(message.clone());
        if let Err(e) = self
            .dispatch(run, &batch, BackfillStatus::Failed, mutation)
            .await
        {
            error!(batch_id = %batch_id, error = %e, "Failed to mark batch failed");
        }
    }

    async fn dispatch<'a>(
        &self,
        run: &BackfillRun,
        batch: &BackfillRunBatch,
        status: BackfillStatus,
        mutation: BoxFuture<'a, Result<()>>,
    ) -> Result<TransitionOutcome> {
        let definition: Option<Arc<dyn BackfillDefinition>> =
            self.services.registry.find(&run.backfill_class_name);
        let ctx = batch.hook_context(run, status);

        self.services
            .dispatcher
            .dispatch(definition.as_ref().and_then(|d| d.hooks()), &ctx, mutation)
            .await
    }
}
