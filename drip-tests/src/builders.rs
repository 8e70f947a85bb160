//! Builders for constructing test harnesses
//!
//! A [`Harness`] wires an [`Orchestrator`] to the in-memory run store, record
//! store and job queue so tests can drive runs step by step.

use crate::fixtures::{definitions, employees};
use drip_core::{BackfillDefinition, DefinitionRegistry, HookSet, InMemoryRecordStore};
use drip_runtime::{
    BackfillRun, DripConfig, InMemoryJobQueue, JobQueue, NewRun, Orchestrator, QueuedJob,
};
use drip_storage::InMemoryRunStore;
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`Harness`]
pub struct HarnessBuilder {
    definitions: Vec<Arc<dyn BackfillDefinition>>,
    employees: Vec<employees::Employee>,
    config: DripConfig,
    queue: Option<Arc<dyn JobQueue>>,
}

impl HarnessBuilder {
    /// Standard definitions, no employees, zero sleep between pages
    pub fn new() -> Self {
        Self {
            definitions: definitions::all(),
            employees: Vec::new(),
            config: DripConfig::default().with_sleep_time(Duration::ZERO),
            queue: None,
        }
    }

    /// Register a definition, replacing a standard one of the same name
    pub fn with_definition(mut self, definition: Arc<dyn BackfillDefinition>) -> Self {
        self.definitions.retain(|d| d.name() != definition.name());
        self.definitions.push(definition);
        self
    }

    pub fn with_employees(mut self, employees: Vec<employees::Employee>) -> Self {
        self.employees = employees;
        self
    }

    pub fn with_config(mut self, config: DripConfig) -> Self {
        self.config = config;
        self
    }

    /// Config-level fallback hooks
    pub fn with_fallback_hooks(mut self, hooks: HookSet) -> Self {
        self.config = self.config.with_hooks(hooks);
        self
    }

    /// Use `queue` instead of the in-memory queue for enqueues
    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn build(self) -> Harness {
        crate::init_test_logging();

        let registry = DefinitionRegistry::new();
        for definition in self.definitions {
            registry
                .register(definition)
                .expect("Failed to register definition");
        }

        let records = InMemoryRecordStore::new();
        employees::seed(&records, &self.employees);

        let runs = InMemoryRunStore::new();
        let local = InMemoryJobQueue::new();
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(local.clone()) as Arc<dyn JobQueue>);

        let orchestrator = Orchestrator::new(
            registry,
            Arc::new(runs.clone()),
            Arc::new(records.clone()),
            queue,
            self.config,
        )
        .expect("Failed to build orchestrator");

        Harness {
            orchestrator,
            queue: local,
            runs,
            records,
        }
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Orchestrator plus handles on every in-memory store behind it
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub queue: InMemoryJobQueue,
    pub runs: InMemoryRunStore,
    pub records: InMemoryRecordStore,
}

impl Harness {
    /// Validate and create a run
    pub async fn create(&self, request: NewRun) -> drip_runtime::Result<BackfillRun> {
        self.orchestrator.create_run(&request).await
    }

    /// Handle the next queued job, ignoring its schedule
    pub async fn step(&self) -> Option<(QueuedJob, drip_runtime::Result<()>)> {
        let job = self.queue.pop()?;
        let result = self.orchestrator.handle(job.item).await;
        Some((job, result))
    }

    /// Handle queued jobs in FIFO order until the queue is empty
    pub async fn drain(&self) -> Vec<drip_runtime::Result<()>> {
        let mut results = Vec::new();
        while let Some((_, result)) = self.step().await {
            results.push(result);
        }
        results
    }

    pub async fn run(&self, run: &BackfillRun) -> BackfillRun {
        self.orchestrator
            .get_run(run.id)
            .await
            .expect("Failed to reload run")
    }

    /// Sizes of a run's batches in id order
    pub fn batch_sizes(&self, run: &BackfillRun) -> Vec<i32> {
        self.runs
            .batches_for(run.id)
            .iter()
            .map(|batch| batch.batch_size)
            .collect()
    }
}
