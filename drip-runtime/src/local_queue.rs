//! In-process job queue and worker
//!
//! [`InMemoryJobQueue`] records enqueued work; [`LocalWorker`] drains it through
//! an [`Orchestrator`], running up to `max_concurrent` items at a time.

use crate::orchestrator::Orchestrator;
use crate::queue::{EnqueueResult, JobQueue, WorkItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument};

/// A job waiting in the in-memory queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub handle: String,
    pub queue: String,
    pub item: WorkItem,
    pub run_at: Option<DateTime<Utc>>,
}

impl QueuedJob {
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.run_at.map_or(true, |at| at <= now)
    }
}

/// FIFO job queue held in memory. Cloning shares the queue.
#[derive(Clone, Default)]
pub struct InMemoryJobQueue {
    jobs: Arc<Mutex<VecDeque<QueuedJob>>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the queued jobs
    pub fn jobs(&self) -> Vec<QueuedJob> {
        self.jobs.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Remove and return the oldest job regardless of its schedule
    pub fn pop(&self) -> Option<QueuedJob> {
        self.jobs.lock().pop_front()
    }

    /// Remove and return every job due at `now`, oldest first
    pub fn take_ready(&self, now: DateTime<Utc>) -> Vec<QueuedJob> {
        let mut jobs = self.jobs.lock();
        let (ready, waiting): (Vec<_>, Vec<_>) = jobs.drain(..).partition(|job| job.is_ready(now));
        jobs.extend(waiting);
        ready
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        queue: &str,
        item: WorkItem,
        run_at: Option<DateTime<Utc>>,
    ) -> EnqueueResult<String> {
        let handle = format!("{}-{}", queue, self.sequence.fetch_add(1, Ordering::SeqCst) + 1);
        self.jobs.lock().push_back(QueuedJob {
            handle: handle.clone(),
            queue: queue.to_string(),
            item,
            run_at,
        });
        debug!(handle = %handle, item = %item, "Job queued");
        Ok(handle)
    }
}

/// Counts of jobs handled by a [`LocalWorker`] drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: usize,
    pub failed: usize,
}

/// Drains an [`InMemoryJobQueue`] through an orchestrator
pub struct LocalWorker {
    orchestrator: Orchestrator,
    queue: InMemoryJobQueue,
    semaphore: Arc<Semaphore>,
    ignore_schedule: bool,
}

impl LocalWorker {
    pub fn new(orchestrator: Orchestrator, queue: InMemoryJobQueue, max_concurrent: usize) -> Self {
        Self {
            orchestrator,
            queue,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            ignore_schedule: false,
        }
    }

    /// Run jobs scheduled in the future as well
    pub fn ignore_schedule(mut self) -> Self {
        self.ignore_schedule = true;
        self
    }

    fn take(&self) -> Vec<QueuedJob> {
        if self.ignore_schedule {
            std::iter::from_fn(|| self.queue.pop()).collect()
        } else {
            self.queue.take_ready(Utc::now())
        }
    }

    /// Run queued jobs, including jobs they enqueue, until none is due
    #[instrument(skip(self), fields(max_concurrent = self.semaphore.available_permits()))]
    pub async fn run_until_idle(&self) -> WorkerReport {
        let mut report = WorkerReport::default();

        loop {
            let jobs = self.take();
            if jobs.is_empty() {
                break;
            }

            let mut tasks = JoinSet::new();
            for job in jobs {
                let orchestrator = self.orchestrator.clone();
                let semaphore = self.semaphore.clone();
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let result = orchestrator.handle(job.item).await;
                    (job, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, Ok(()))) => report.processed += 1,
                    Ok((job, Err(e))) => {
                        error!(handle = %job.handle, item = %job.item, error = %e, "Job failed");
                        report.failed += 1;
                    }
                    Err(e) => {
                        error!(error = %e, "Job panicked");
                        report.failed += 1;
                    }
                }
            }
        }

        report
    }
}
