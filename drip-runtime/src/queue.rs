//! Job queue abstraction for scheduling run and batch execution

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Result type for enqueueing operations
pub type EnqueueResult<T> = std::result::Result<T, EnqueueError>;

/// Errors that can occur while enqueueing work
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Queue API error: {0}")]
    QueueApi(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Unit of asynchronous work handed to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum WorkItem {
    /// Plan a run and create its batches
    DripRun { run_id: Uuid },

    /// Process one batch
    DripBatch { batch_id: Uuid },
}

impl WorkItem {
    pub fn id(&self) -> Uuid {
        match self {
            Self::DripRun { run_id } => *run_id,
            Self::DripBatch { batch_id } => *batch_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::DripRun { .. } => "drip_run",
            Self::DripBatch { .. } => "drip_batch",
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.id())
    }
}

/// Abstraction over the queue that executes runs and batches.
///
/// Implementations should:
/// - Deliver each item at least once, no earlier than `run_at` when given
/// - Call back into [`Orchestrator::handle`](crate::Orchestrator::handle)
/// - Return an opaque handle identifying the queued job
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue `item` on the named queue
    async fn enqueue(
        &self,
        queue: &str,
        item: WorkItem,
        run_at: Option<DateTime<Utc>>,
    ) -> EnqueueResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_serialization() {
        let run_id = Uuid::new_v4();
        let item = WorkItem::DripRun { run_id };
        let json = serde_json::to_value(item).unwrap();
        assert_eq!(json["job"], "drip_run");
        assert_eq!(json["run_id"], run_id.to_string());

        let back: WorkItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
        assert_eq!(item.to_string(), format!("drip_run({})", run_id));
    }
}
