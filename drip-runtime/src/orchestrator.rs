//! Orchestrator facade
//!
//! The orchestrator is stateless and thread-safe. Operators create, stop and
//! delete runs through it and read progress and listings back; queue workers
//! hand it the [`WorkItem`]s they receive.
//!
//! # Example
//!
//! ```no_run
//! use drip_core::{DefinitionRegistry, InMemoryRecordStore};
//! use drip_runtime::{DripConfig, InMemoryJobQueue, NewRun, Orchestrator};
//! use drip_storage::InMemoryRunStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = DefinitionRegistry::new();
//! let orchestrator = Orchestrator::new(
//!     registry,
//!     Arc::new(InMemoryRunStore::new()),
//!     Arc::new(InMemoryRecordStore::new()),
//!     Arc::new(InMemoryJobQueue::new()),
//!     DripConfig::from_env()?,
//! )?;
//!
//! let run = orchestrator
//!     .create_run(&NewRun::new("AddRoleToEmployee").option("age", 25).batch_size(500))
//!     .await?;
//! println!("{:?}", orchestrator.run_progress(run.id).await?);
//! # Ok(())
//! # }
//! ```

use crate::batch_executor::BatchExecutor;
use crate::batch_machine::BatchStateMachine;
use crate::config::DripConfig;
use crate::converters::{BackfillRun, BackfillRunBatch};
use crate::hooks::TransitionOutcome;
use crate::queue::{JobQueue, WorkItem};
use crate::read_model::{Paginated, Pagination, RunProgress};
use crate::run_machine::{NewRun, RunStateMachine, ValidatedRun};
use crate::services::{map_storage_error, Services};
use crate::{Error, Result};
use drip_core::{DefinitionRegistry, FormField, RecordStore};
use drip_storage::RunStore;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Default page size of the run listing
pub const RUNS_PER_PAGE: i64 = 10;

/// Default page size of a run's batch listing
pub const BATCHES_PER_PAGE: i64 = 20;

const MAX_PER_PAGE: i64 = 1000;

/// Entry point for operators and queue workers
#[derive(Clone)]
pub struct Orchestrator {
    services: Arc<Services>,
    runs: RunStateMachine,
    batches: BatchStateMachine,
}

impl Orchestrator {
    /// Create an orchestrator, validating `config`
    pub fn new(
        registry: DefinitionRegistry,
        runs: Arc<dyn RunStore>,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn JobQueue>,
        config: DripConfig,
    ) -> Result<Self> {
        config.validate()?;
        let services = Arc::new(Services::new(registry, runs, records, queue, config));
        Ok(Self {
            runs: RunStateMachine::new(services.clone()),
            batches: BatchStateMachine::new(services.clone()),
            services,
        })
    }

    /// Process batches with `executor`
    pub fn with_executor(mut self, executor: BatchExecutor) -> Self {
        self.batches = self.batches.with_executor(executor);
        self
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn run_machine(&self) -> &RunStateMachine {
        &self.runs
    }

    pub fn batch_machine(&self) -> &BatchStateMachine {
        &self.batches
    }

    /// Validate a request without creating a run
    pub async fn validate_run(&self, request: &NewRun) -> Result<ValidatedRun> {
        self.runs.validate(request).await
    }

    /// Validate and persist a run, then enqueue it
    pub async fn create_run(&self, request: &NewRun) -> Result<BackfillRun> {
        self.runs.create_run(request).await
    }

    /// Stop a running run
    pub async fn stop_run(&self, run_id: Uuid) -> Result<TransitionOutcome> {
        self.runs.request_stop(run_id).await
    }

    /// Delete an enqueued run and its batches
    pub async fn delete_run(&self, run_id: Uuid) -> Result<()> {
        self.runs.delete(run_id).await
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<BackfillRun> {
        self.runs.load(run_id).await
    }

    pub async fn run_progress(&self, run_id: Uuid) -> Result<RunProgress> {
        let run = self.runs.load(run_id).await?;
        Ok(RunProgress::from(&run))
    }

    /// Runs, newest first
    #[instrument(skip(self))]
    pub async fn list_runs(&self, page: i64, per_page: i64) -> Result<Paginated<BackfillRun>> {
        let store = &self.services.runs;
        let total = store
            .count_runs()
            .await
            .map_err(|e| map_storage_error(e, "Failed to count runs"))?;
        let pagination = Pagination::new(page, per_page.min(MAX_PER_PAGE), total);

        let items = store
            .list_runs(pagination.per_page, pagination.offset())
            .await
            .map_err(|e| map_storage_error(e, "Failed to list runs"))?
            .into_iter()
            .map(BackfillRun::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Paginated { items, pagination })
    }

    /// Batches of a run, newest first
    #[instrument(skip(self))]
    pub async fn list_batches(
        &self,
        run_id: Uuid,
        page: i64,
        per_page: i64,
    ) -> Result<Paginated<BackfillRunBatch>> {
        self.runs.load(run_id).await?;

        let store = &self.services.runs;
        let total = store
            .count_batches(run_id)
            .await
            .map_err(|e| map_storage_error(e, "Failed to count batches"))?;
        let pagination = Pagination::new(page, per_page.min(MAX_PER_PAGE), total);

        let items = store
            .list_batches(run_id, pagination.per_page, pagination.offset())
            .await
            .map_err(|e| map_storage_error(e, "Failed to list batches"))?
            .into_iter()
            .map(BackfillRunBatch::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Paginated { items, pagination })
    }

    /// Registered definition names, sorted
    pub fn definition_names(&self) -> Vec<String> {
        self.services.registry.names()
    }

    /// Form fields of a definition's options, pre-filled from `current`
    pub fn option_form(&self, definition: &str, current: &Map<String, Value>) -> Result<Vec<FormField>> {
        let definition = self
            .services
            .registry
            .find(definition)
            .ok_or_else(|| Error::NotFound(format!("Backfill definition '{}'", definition)))?;
        Ok(definition.options_schema().form_fields(current))
    }

    /// Execute a work item delivered by the queue
    #[instrument(skip(self), fields(item = %item))]
    pub async fn handle(&self, item: WorkItem) -> Result<()> {
        match item {
            WorkItem::DripRun { run_id } => self.runs.execute(run_id).await,
            WorkItem::DripBatch { batch_id } => self.batches.execute(batch_id).await,
        }
    }
}
