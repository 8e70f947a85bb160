//! Processing of record pages with a bound backfill instance

use crate::metrics::{PAGE_PROCESSING_DURATION, RECORDS_PROCESSED_TOTAL};
use crate::Result;
use drip_core::{BackfillInstance, Page, ProcessContext, ProcessingStrategy};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Runs a definition's processing function over pages, pausing after each
#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    sleep_override: Option<Duration>,
}

impl BatchExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `sleep_time` instead of the instance's configured pause
    pub fn with_sleep_time(sleep_time: Duration) -> Self {
        Self {
            sleep_override: Some(sleep_time),
        }
    }

    fn sleep_time(&self, instance: &BackfillInstance) -> Duration {
        self.sleep_override.unwrap_or_else(|| instance.sleep_time())
    }

    /// Process one page and return the number of records handed to the definition
    #[instrument(
        skip(self, instance, ctx, page),
        fields(
            definition = instance.name(),
            batch_id = %ctx.batch_id,
            records = page.len(),
        )
    )]
    pub async fn execute_page(
        &self,
        instance: &BackfillInstance,
        ctx: &ProcessContext<'_>,
        page: &Page,
    ) -> Result<u64> {
        if page.is_empty() {
            return Ok(0);
        }

        let strategy = instance.strategy();
        let start = Instant::now();

        match strategy {
            ProcessingStrategy::WholeBatch => {
                instance.definition().process_batch(ctx, page).await?;
            }
            ProcessingStrategy::PerElement => {
                for record in page.records() {
                    instance.definition().process_element(ctx, record).await?;
                }
            }
        }

        let strategy_label = match strategy {
            ProcessingStrategy::WholeBatch => "whole_batch",
            ProcessingStrategy::PerElement => "per_element",
        };
        PAGE_PROCESSING_DURATION
            .with_label_values(&[instance.name(), strategy_label])
            .observe(start.elapsed().as_secs_f64());
        RECORDS_PROCESSED_TOTAL
            .with_label_values(&[instance.name()])
            .inc_by(page.len() as u64);
        debug!(duration_ms = start.elapsed().as_millis() as u64, "Page processed");

        let pause = self.sleep_time(instance);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        Ok(page.len() as u64)
    }
}
