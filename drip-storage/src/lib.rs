//! # Drip Storage
//!
//! Persistence for backfill runs and their batches: the [`RunStore`] trait, an
//! in-memory implementation, a PostgreSQL implementation with migrations, and a
//! PostgreSQL adapter for the record store the backfills operate on.

pub mod backfiller;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod postgres;
pub mod record_store;
pub mod store;

// Re-export commonly used types
pub use backfiller::BackfillerId;
pub use memory::InMemoryRunStore;
pub use models::{BackfillRunBatchModel, BackfillRunModel};
pub use postgres::{PoolConfig, PostgresStorage};
pub use record_store::PostgresRecordStore;
pub use store::RunStore;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A compare-and-set status update found a different status
    #[error("Stale status: {0}")]
    StaleStatus(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
