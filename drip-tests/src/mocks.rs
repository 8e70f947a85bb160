//! Mock implementations for Drip seams
//!
//! A hook recorder that registers every lifecycle slot and a job queue that
//! refuses every job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drip_core::{
    AroundTransition, BackfillStatus, HookContext, HookScope, HookSet, Proceed,
};
use drip_runtime::{EnqueueError, EnqueueResult, JobQueue, WorkItem};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Records every hook invocation as `<timing>_<scope>_<status>`.
///
/// Around hooks record `around_<scope>_<status>:start` and `:end` around the
/// mutation.
///
/// # Example
///
/// ```ignore
/// use drip_tests::mocks::HookRecorder;
///
/// let recorder = HookRecorder::new();
/// let hooks = recorder.hook_set(&[HookScope::Run]);
/// // hand `hooks` to a definition or the config fallback...
/// assert_eq!(recorder.count("after_run_completed"), 1);
/// ```
#[derive(Clone, Default)]
pub struct HookRecorder {
    entries: Arc<Mutex<Vec<String>>>,
}

struct RecordingAround {
    entries: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl AroundTransition for RecordingAround {
    async fn around(&self, ctx: &HookContext, proceed: Proceed<'_>) -> drip_core::Result<()> {
        self.entries
            .lock()
            .push(format!("around_{}_{}:start", ctx.scope.prefix(), ctx.status));
        let result = proceed.run().await;
        self.entries
            .lock()
            .push(format!("around_{}_{}:end", ctx.scope.prefix(), ctx.status));
        result
    }
}

impl HookRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hook set with before, around and after hooks on every status of `scopes`
    pub fn hook_set(&self, scopes: &[HookScope]) -> HookSet {
        let mut hooks = HookSet::new();
        for &scope in scopes {
            for status in BackfillStatus::ALL {
                let before = self.entries.clone();
                let after = self.entries.clone();
                hooks = hooks
                    .before(scope, status, move |ctx| {
                        before
                            .lock()
                            .push(format!("before_{}_{}", ctx.scope.prefix(), ctx.status));
                        Ok(())
                    })
                    .around(
                        scope,
                        status,
                        RecordingAround {
                            entries: self.entries.clone(),
                        },
                    )
                    .after(scope, status, move |ctx| {
                        after
                            .lock()
                            .push(format!("after_{}_{}", ctx.scope.prefix(), ctx.status));
                        Ok(())
                    });
            }
        }
        hooks
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Number of times `entry` was recorded
    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| e.as_str() == entry).count()
    }

    /// Position of the first occurrence of `entry`
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Job queue whose every enqueue fails with [`EnqueueError::Unavailable`]
#[derive(Clone, Default)]
pub struct FailingJobQueue {
    attempts: Arc<AtomicUsize>,
}

impl FailingJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of enqueue attempts so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobQueue for FailingJobQueue {
    async fn enqueue(
        &self,
        queue: &str,
        item: WorkItem,
        _run_at: Option<DateTime<Utc>>,
    ) -> EnqueueResult<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(EnqueueError::Unavailable(format!(
            "queue '{}' refused {}",
            queue, item
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drip_core::HookTiming;
    use uuid::Uuid;

    #[test]
    fn test_recorder_registers_every_slot() {
        let hooks = HookRecorder::new().hook_set(&[HookScope::Run, HookScope::Batch]);
        for scope in [HookScope::Run, HookScope::Batch] {
            for status in BackfillStatus::ALL {
                for timing in [HookTiming::Before, HookTiming::Around, HookTiming::After] {
                    assert!(hooks.has(drip_core::HookSlot::new(timing, scope, status)));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_failing_queue_counts_attempts() {
        let queue = FailingJobQueue::new();
        let result = queue
            .enqueue("data_drip", WorkItem::DripRun { run_id: Uuid::new_v4() }, None)
            .await;
        assert!(matches!(result, Err(EnqueueError::Unavailable(_))));
        assert_eq!(queue.attempts(), 1);
    }
}
