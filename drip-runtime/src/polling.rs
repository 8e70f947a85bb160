//! Progress polling for backfill runs

use crate::orchestrator::Orchestrator;
use crate::read_model::RunProgress;
use crate::{Error, Result};
use std::time::Duration;
use tokio::time::{interval, timeout};
use tracing::{debug, info};
use uuid::Uuid;

/// Poll a run until it reaches a terminal status.
///
/// `on_change` sees every snapshot that differs from the previous one,
/// starting with the first. Returns the final snapshot, or [`Error::Timeout`].
pub async fn poll_run_progress<F>(
    orchestrator: &Orchestrator,
    run_id: Uuid,
    poll_interval: Duration,
    timeout_duration: Duration,
    mut on_change: F,
) -> Result<RunProgress>
where
    F: FnMut(&RunProgress),
{
    debug!(
        run_id = %run_id,
        timeout = ?timeout_duration,
        interval = ?poll_interval,
        "Polling run progress"
    );

    let mut ticker = interval(poll_interval);
    let mut last: Option<RunProgress> = None;

    let result: std::result::Result<Result<RunProgress>, _> = timeout(timeout_duration, async {
        loop {
            ticker.tick().await;

            let progress = orchestrator.run_progress(run_id).await?;
            if last.as_ref() != Some(&progress) {
                on_change(&progress);
                last = Some(progress.clone());
            }

            if progress.is_finished() {
                info!(run_id = %run_id, status = %progress.status, "Backfill run finished");
                return Ok(progress);
            }
        }
    })
    .await;

    match result {
        Ok(progress) => progress,
        Err(_) => Err(Error::Timeout(format!(
            "Backfill run {} did not finish within {:?}",
            run_id, timeout_duration
        ))),
    }
}
