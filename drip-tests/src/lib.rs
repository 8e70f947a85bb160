//! Shared test utilities for Drip crates
//!
//! This crate provides:
//! - **Fixtures**: employee records and sample backfill definitions
//! - **Builders**: a harness wiring the orchestrator to in-memory stores
//! - **Mocks**: recording hooks and a failing job queue
//! - **Assertions**: checks over runs and their batches
//!
//! # Example
//!
//! ```ignore
//! use drip_tests::{builders::HarnessBuilder, fixtures};
//!
//! #[tokio::test]
//! async fn test_backfill() {
//!     let harness = HarnessBuilder::new().with_employees(fixtures::employees::standard()).build();
//!     let run = harness.create(drip_runtime::NewRun::new("AddRoleToEmployee")).await.unwrap();
//!     harness.drain().await;
//!     // ...
//! }
//! ```

pub mod assertions;
pub mod builders;
pub mod fixtures;
pub mod mocks;

// Re-export commonly used items
pub use builders::{Harness, HarnessBuilder};
pub use mocks::{FailingJobQueue, HookRecorder};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Initialise test logging once per process, honouring `RUST_LOG`
pub fn init_test_logging() {
    LOGGING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
