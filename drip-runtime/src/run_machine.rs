//! Run lifecycle
//!
//! A run is validated and persisted in `pending`, enqueued by its commit step,
//! planned into batches by [`RunStateMachine::execute`], advanced by batch
//! completions and finally `completed`, `failed` or `stopped`.

use crate::batch_machine::BatchStateMachine;
use crate::converters::BackfillRun;
use crate::hooks::TransitionOutcome;
use crate::metrics::BATCHES_PLANNED_TOTAL;
use crate::planner::BatchPlanner;
use crate::queue::WorkItem;
use crate::services::{map_storage_error, Services};
use crate::validation::{ValidationErrorKind, ValidationErrors};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use drip_core::options::parse_datetime;
use drip_core::{BackfillDefinition, BackfillInstance, BackfillStatus, TypedOptions};
use drip_storage::{BackfillRunBatchModel, BackfillRunModel, BackfillerId};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const EMPTY_SCOPE_MESSAGE: &str = "No records to process with the current configuration. Please adjust your options or select a different backfill class.";

/// Parameters submitted by an operator to start a backfill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRun {
    pub backfill_class_name: String,
    #[serde(default)]
    pub options: Map<String, Value>,
    pub batch_size: Option<i64>,
    pub amount_of_elements: Option<i64>,

    /// RFC 3339 or `YYYY-MM-DD HH:MM:SS` (UTC)
    pub start_at: Option<String>,

    pub backfiller: Option<BackfillerId>,
}

impl NewRun {
    /// Request for `definition`, starting now, with the configured batch size
    pub fn new(backfill_class_name: impl Into<String>) -> Self {
        Self {
            backfill_class_name: backfill_class_name.into(),
            options: Map::new(),
            batch_size: None,
            amount_of_elements: None,
            start_at: Some(Utc::now().to_rfc3339()),
            backfiller: None,
        }
    }

    pub fn option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }

    pub fn batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn amount_of_elements(mut self, amount: i64) -> Self {
        self.amount_of_elements = Some(amount);
        self
    }

    pub fn start_at(mut self, start_at: impl Into<String>) -> Self {
        self.start_at = Some(start_at.into());
        self
    }

    pub fn backfiller(mut self, backfiller: impl Into<BackfillerId>) -> Self {
        self.backfiller = Some(backfiller.into());
        self
    }
}

/// A request that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedRun {
    pub backfill_class_name: String,
    pub options: Map<String, Value>,
    pub batch_size: u32,
    pub amount_of_elements: Option<u64>,
    pub start_at: DateTime<Utc>,

    /// Records the run would touch at validation time
    pub count: u64,

    pub backfiller: Option<BackfillerId>,
}

/// State machine for backfill runs
#[derive(Clone)]
pub struct RunStateMachine {
    services: Arc<Services>,
}

impl RunStateMachine {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Load a run by id
    pub async fn load(&self, run_id: Uuid) -> Result<BackfillRun> {
        self.services
            .runs
            .get_run(run_id)
            .await
            .map_err(|e| map_storage_error(e, "Failed to load backfill run"))?
            .try_into()
    }

    /// Validate a request without persisting anything.
    ///
    /// Field errors are collected into [`Error::Validation`]. Errors that are
    /// not about the request itself (record store failures, a failing
    /// `before_backfill` callback) are returned as they are.
    #[instrument(skip(self, request), fields(definition = %request.backfill_class_name))]
    pub async fn validate(&self, request: &NewRun) -> Result<ValidatedRun> {
        let mut errors = ValidationErrors::new();
        let name = request.backfill_class_name.trim();

        let batch_size = match request.batch_size {
            None => Some(self.services.config.default_batch_size),
            Some(size) if size > 0 && size <= i32::MAX as i64 => Some(size as u32),
            Some(size) if size > 0 => {
                errors.add(
                    "batch_size",
                    ValidationErrorKind::InvalidBatchSize,
                    format!("must be less than or equal to {}", i32::MAX),
                );
                None
            }
            Some(_) => {
                errors.add(
                    "batch_size",
                    ValidationErrorKind::InvalidBatchSize,
                    "must be greater than 0",
                );
                None
            }
        };

        let amount_of_elements = match request.amount_of_elements {
            Some(amount) if amount < 0 => {
                errors.add(
                    "amount_of_elements",
                    ValidationErrorKind::InvalidAmountOfElements,
                    "must be greater than or equal to 0",
                );
                None
            }
            other => other.map(|n| n as u64),
        };

        let start_at = match request.start_at.as_deref().map(str::trim) {
            None | Some("") => {
                errors.add("start_at", ValidationErrorKind::Blank, "can't be blank");
                None
            }
            Some(raw) => {
                let parsed = parse_datetime(raw);
                if parsed.is_none() {
                    errors.add(
                        "start_at",
                        ValidationErrorKind::InvalidStartAt,
                        "must be a valid datetime",
                    );
                }
                parsed
            }
        };

        let mut count = 0;
        if name.is_empty() {
            errors.add(
                "backfill_class_name",
                ValidationErrorKind::Blank,
                "can't be blank",
            );
        } else if let Some(definition) = self.services.registry.find(name) {
            count = self
                .validate_scope(
                    definition.as_ref(),
                    request,
                    batch_size.unwrap_or(self.services.config.default_batch_size),
                    amount_of_elements,
                    &mut errors,
                )
                .await?;
        } else {
            errors.add(
                "backfill_class_name",
                ValidationErrorKind::UnknownDefinition,
                "must be a valid backfill definition",
            );
        }

        errors.into_result()?;

        match (batch_size, start_at) {
            (Some(batch_size), Some(start_at)) => Ok(ValidatedRun {
                backfill_class_name: name.to_string(),
                options: request.options.clone(),
                batch_size,
                amount_of_elements,
                start_at,
                count,
                backfiller: request.backfiller.clone(),
            }),
            _ => Err(Error::Internal(
                "validation passed without batch size or start time".to_string(),
            )),
        }
    }

    /// Cast options, resolve the scope and count it; returns the count
    async fn validate_scope(
        &self,
        definition: &dyn BackfillDefinition,
        request: &NewRun,
        batch_size: u32,
        amount_of_elements: Option<u64>,
        errors: &mut ValidationErrors,
    ) -> Result<u64> {
        let options = match definition.options_schema().cast(&request.options) {
            Ok(options) => options,
            Err(drip_core::Error::UnknownOption(names)) => {
                errors.add(
                    "options",
                    ValidationErrorKind::UnknownOption,
                    format!("contains unknown attributes: {}", names),
                );
                return Ok(0);
            }
            Err(e) => {
                errors.add("options", ValidationErrorKind::Cast, e.to_string());
                return Ok(0);
            }
        };

        self.services.config.run_before_backfill()?;

        let scope = match definition.scope(&options) {
            Ok(scope) => scope,
            Err(drip_core::Error::NotImplemented(_)) => {
                errors.add(
                    "backfill_class_name",
                    ValidationErrorKind::NotABackfillDefinition,
                    "must implement a scope",
                );
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let scope = match amount_of_elements {
            Some(limit) if limit > 0 => scope.limit(limit),
            _ => scope,
        };
        let count = self.services.records.count(&scope).await?;

        if count == 0 {
            errors.add("base", ValidationErrorKind::EmptyScope, EMPTY_SCOPE_MESSAGE);
        }
        tracing::debug!(batch_size, count, "Validated backfill scope");
        Ok(count)
    }

    /// Validate, persist in `pending`, then run the commit step
    #[instrument(skip(self, request), fields(definition = %request.backfill_class_name))]
    pub async fn create_run(&self, request: &NewRun) -> Result<BackfillRun> {
        let validated = self.validate(request).await?;

        let model = BackfillRunModel::pending(
            validated.backfill_class_name.clone(),
            Value::Object(validated.options),
            validated.batch_size as i32,
            validated.amount_of_elements.map(|n| n as i64),
            validated.start_at,
            validated.backfiller.map(|b| b.0),
        );
        let run_id = model.id;

        self.services
            .runs
            .insert_run(&model)
            .await
            .map_err(|e| map_storage_error(e, "Failed to create backfill run"))?;
        info!(run_id = %run_id, count = validated.count, "Backfill run created");

        self.on_commit(run_id).await?;
        self.load(run_id).await
    }

    /// Enqueue a `pending` run at its `start_at` and mark it `enqueued`
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn on_commit(&self, run_id: Uuid) -> Result<()> {
        let run = self.load(run_id).await?;
        if run.status != BackfillStatus::Pending {
            return Ok(());
        }

        let definition = self.services.registry.find(&run.backfill_class_name);
        let ctx = run.hook_context(BackfillStatus::Enqueued);
        let services = &self.services;
        let start_at = run.start_at;

        let mutation: BoxFuture<'_, Result<()>> = Box::pin(async move {
            let handle = services
                .queue
                .enqueue(
                    &services.config.queue_name,
                    WorkItem::DripRun { run_id },
                    Some(start_at),
                )
                .await?;
            services
                .runs
                .transition_run_status(run_id, BackfillStatus::Pending, BackfillStatus::Enqueued, None)
                .await
                .map_err(|e| map_storage_error(e, "Failed to mark run enqueued"))?;
            info!(run_id = %run_id, handle = %handle, start_at = %start_at, "Backfill run enqueued");
            Ok(())
        });

        let result = services
            .dispatcher
            .dispatch(definition.as_ref().and_then(|d| d.hooks()), &ctx, mutation)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.fail(run_id, &e).await;
                Err(e)
            }
        }
    }

    /// Plan the run into batches and enqueue them.
    ///
    /// Runs that no longer exist or are not `enqueued` are skipped. Any error
    /// marks the run `failed` and is returned.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn execute(&self, run_id: Uuid) -> Result<()> {
        let run = match self.load(run_id).await {
            Ok(run) => run,
            Err(Error::NotFound(_)) => {
                info!("Backfill run no longer exists, skipping");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if run.status != BackfillStatus::Enqueued {
            warn!(status = %run.status, "Backfill run is not enqueued, skipping");
            return Ok(());
        }

        match self.start(&run).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "Backfill run failed");
                self.fail(run_id, &e).await;
                Err(e)
            }
        }
    }

    async fn start(&self, run: &BackfillRun) -> Result<()> {
        let definition = self.definition(&run.backfill_class_name)?;
        let ctx = run.hook_context(BackfillStatus::Running);
        let created: Mutex<Vec<BackfillRunBatchModel>> = Mutex::new(Vec::new());

        let mutation: BoxFuture<'_, Result<()>> = Box::pin(self.plan(run, &definition, &created));
        let outcome = self
            .services
            .dispatcher
            .dispatch(definition.hooks(), &ctx, mutation)
            .await?;

        if !outcome.is_applied() {
            return Ok(());
        }

        let batches = std::mem::take(&mut *created.lock());
        if batches.is_empty() {
            // Nothing left to process, no batch will ever report completion
            self.complete_if_finished(run.id).await?;
            return Ok(());
        }

        let batch_machine = BatchStateMachine::new(self.services.clone());
        for batch in &batches {
            batch_machine.on_commit(batch.id).await?;
        }
        Ok(())
    }

    /// Mark the run `running`, plan its batches and persist them atomically
    async fn plan(
        &self,
        run: &BackfillRun,
        definition: &Arc<dyn BackfillDefinition>,
        created: &Mutex<Vec<BackfillRunBatchModel>>,
    ) -> Result<()> {
        let services = &self.services;
        services
            .runs
            .transition_run_status(run.id, BackfillStatus::Enqueued, BackfillStatus::Running, None)
            .await
            .map_err(|e| map_storage_error(e, "Failed to mark run running"))?;

        services.config.run_before_backfill()?;
        let instance = self.instance(definition, run, run.batch_size)?;
        let scope = instance.limited_scope(run.amount_of_elements)?;

        let planned = BatchPlanner::new(services.records.as_ref(), run.batch_size)
            .plan(&scope)
            .await?;
        let total_count: i64 = planned.iter().map(|b| b.actual_size as i64).sum();

        let effective_batch_size = match run.amount_of_elements {
            Some(amount) if amount > 0 && amount < run.batch_size as u64 => amount as i32,
            _ => run.batch_size as i32,
        };
        services
            .runs
            .record_run_plan(run.id, total_count, effective_batch_size)
            .await
            .map_err(|e| map_storage_error(e, "Failed to record run plan"))?;

        let batches: Vec<BackfillRunBatchModel> = planned
            .iter()
            .map(|b| BackfillRunBatchModel::pending(run.id, b.start_id, b.finish_id, b.actual_size as i32))
            .collect();
        services
            .runs
            .create_batches(&batches)
            .await
            .map_err(|e| map_storage_error(e, "Failed to create batches"))?;

        BATCHES_PLANNED_TOTAL
            .with_label_values(&[definition.name()])
            .inc_by(batches.len() as u64);
        info!(
            run_id = %run.id,
            batches = batches.len(),
            total_count,
            batch_size = effective_batch_size,
            "Backfill run planned"
        );

        *created.lock() = batches;
        Ok(())
    }

    /// Record a completed batch and complete the run once every batch is done
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn on_batch_completed(&self, run_id: Uuid, batch_size: u32) -> Result<()> {
        let processed = self
            .services
            .runs
            .increment_processed_count(run_id, batch_size as i64)
            .await
            .map_err(|e| map_storage_error(e, "Failed to increment processed count"))?;
        tracing::debug!(processed, "Backfill run progress");

        self.complete_if_finished(run_id).await
    }

    async fn complete_if_finished(&self, run_id: Uuid) -> Result<()> {
        let run = self.load(run_id).await?;
        if run.status != BackfillStatus::Running {
            return Ok(());
        }

        let incomplete = self
            .services
            .runs
            .count_incomplete_batches(run_id)
            .await
            .map_err(|e| map_storage_error(e, "Failed to count incomplete batches"))?;
        if incomplete > 0 {
            return Ok(());
        }

        let result = self
            .transition(&run, BackfillStatus::Running, BackfillStatus::Completed, None)
            .await;
        match result {
            Ok(_) => {
                info!(processed_count = run.processed_count, "Backfill run completed");
                Ok(())
            }
            // Another batch completion won the race
            Err(Error::InvalidState(msg)) => {
                tracing::debug!(reason = %msg, "Backfill run already left running");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Stop a `running` run; batches observe it before they start
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn request_stop(&self, run_id: Uuid) -> Result<TransitionOutcome> {
        let run = self.load(run_id).await?;
        if run.status != BackfillStatus::Running {
            return Err(Error::InvalidState(format!(
                "Backfill run can only be stopped while running (status: {})",
                run.status
            )));
        }

        let outcome = self
            .transition(&run, BackfillStatus::Running, BackfillStatus::Stopped, None)
            .await?;
        info!(outcome = ?outcome, "Backfill run stop requested");
        Ok(outcome)
    }

    /// Delete an `enqueued` run together with its batches
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn delete(&self, run_id: Uuid) -> Result<()> {
        let run = self.load(run_id).await?;
        if run.status != BackfillStatus::Enqueued {
            return Err(Error::InvalidState(format!(
                "Backfill run can only be deleted while enqueued (status: {})",
                run.status
            )));
        }

        self.services
            .runs
            .delete_run(run_id, BackfillStatus::Enqueued)
            .await
            .map_err(|e| map_storage_error(e, "Failed to delete backfill run"))?;
        info!("Backfill run deleted");
        Ok(())
    }

    /// Mark the run `failed` with the error's message, if it still can fail.
    /// Errors while failing are logged, the original error is what callers see.
    async fn fail(&self, run_id: Uuid, cause: &Error) {
        let run = match self.load(run_id).await {
            Ok(run) => run,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Failed to load run to mark it failed");
                return;
            }
        };
        if !run.status.can_transition_to(BackfillStatus::Failed) {
            return;
        }

        let message = cause.to_string();
        if let Err(e) = self
            .transition(&run, run.status, BackfillStatus::Failed, Some(&message))
            .await
        {
            error!(run_id = %run_id, error = %e, "Failed to mark run failed");
        }
    }

    /// Dispatch hooks around a plain compare-and-set status change
    async fn transition(
        &self,
        run: &BackfillRun,
        from: BackfillStatus,
        to: BackfillStatus,
        error_message: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let definition = self.services.registry.find(&run.backfill_class_name);
        let mut ctx = run.hook_context(to);
        if let Some(message) = error_message {
            ctx.error_message = Some(message.to_string());
        }

        let runs = &self.services.runs;
        let run_id = run.id;
        let mutation: BoxFuture<'_, Result<()>> = Box::pin(async move {
            runs.transition_run_status(run_id, from, to, error_message)
                .await
                .map_err(|e| map_storage_error(e, "Failed to transition backfill run"))
        });

        self.services
            .dispatcher
            .dispatch(definition.as_ref().and_then(|d| d.hooks()), &ctx, mutation)
            .await
    }

    pub(crate) fn definition(&self, name: &str) -> Result<Arc<dyn BackfillDefinition>> {
        self.services
            .registry
            .find(name)
            .ok_or_else(|| Error::NotFound(format!("Backfill definition '{}'", name)))
    }

    /// Bind a definition to the run's options with the given batch size
    pub(crate) fn instance(
        &self,
        definition: &Arc<dyn BackfillDefinition>,
        run: &BackfillRun,
        batch_size: u32,
    ) -> Result<BackfillInstance> {
        let options: TypedOptions = definition.options_schema().cast(&run.options)?;
        Ok(BackfillInstance::new(
            definition.clone(),
            options,
            batch_size,
            self.services.config.sleep_time,
        ))
    }
}
