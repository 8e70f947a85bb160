//! # Drip Runtime
//!
//! Execution runtime for Drip backfills: the run and batch state machines,
//! hook dispatch, batch planning and execution, and the orchestrator facade
//! the job queue and operators talk to.

pub mod batch_executor;
pub mod batch_machine;
pub mod config;
pub mod converters;
pub mod hooks;
pub mod local_queue;
pub mod metrics;
pub mod orchestrator;
pub mod pager;
pub mod planner;
pub mod polling;
pub mod queue;
pub mod read_model;
pub mod run_machine;
pub mod services;
pub mod validation;

// Re-export commonly used types
pub use batch_executor::BatchExecutor;
pub use batch_machine::BatchStateMachine;
pub use config::{BeforeBackfill, DripConfig};
pub use converters::{BackfillRun, BackfillRunBatch};
pub use hooks::{HookDispatcher, TransitionOutcome};
pub use local_queue::{InMemoryJobQueue, LocalWorker, QueuedJob, WorkerReport};
pub use orchestrator::Orchestrator;
pub use pager::KeysetPager;
pub use planner::{BatchPlanner, PlannedBatch};
pub use polling::poll_run_progress;
pub use queue::{EnqueueError, EnqueueResult, JobQueue, WorkItem};
pub use read_model::{Pagination, Paginated, RunProgress};
pub use run_machine::{NewRun, RunStateMachine};
pub use services::Services;
pub use validation::{FieldError, ValidationErrorKind, ValidationErrors};

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The run request failed validation and was not persisted
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Raised by a backfill definition while planning or processing
    #[error("Definition error: {0}")]
    Definition(#[from] drip_core::Error),

    #[error("Hook error: {0}")]
    Hook(String),

    #[error("Enqueue error: {0}")]
    Enqueue(#[from] EnqueueError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Error::Validation(errors)
    }
}
