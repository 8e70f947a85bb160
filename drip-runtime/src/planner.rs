//! Batch planning
//!
//! Partitions a scope into contiguous `[start_id, finish_id]` ranges of at most
//! `batch_size` records by walking it with a keyset pager.

use crate::pager::KeysetPager;
use crate::{Error, Result};
use drip_core::{RecordId, RecordStore, Scope};
use serde::Serialize;
use tracing::debug;

/// One planned batch: an inclusive id range and the number of records in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedBatch {
    pub start_id: RecordId,
    pub finish_id: RecordId,
    pub actual_size: u32,
}

/// Plans the batches of a run
pub struct BatchPlanner<'a> {
    store: &'a dyn RecordStore,
    batch_size: u32,
}

impl<'a> BatchPlanner<'a> {
    pub fn new(store: &'a dyn RecordStore, batch_size: u32) -> Self {
        Self { store, batch_size }
    }

    /// Plan batches over `scope` in ascending id order.
    ///
    /// Every batch but the last holds exactly `batch_size` records. An empty
    /// scope yields no batches.
    pub async fn plan(&self, scope: &Scope) -> Result<Vec<PlannedBatch>> {
        if self.batch_size == 0 {
            return Err(Error::Configuration(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        let mut pager = KeysetPager::new(self.store, scope.clone(), self.batch_size as usize);
        let mut planned = Vec::new();

        while let Some(page) = pager.next_page().await? {
            if let (Some(start_id), Some(finish_id)) = (page.first_id(), page.last_id()) {
                planned.push(PlannedBatch {
                    start_id,
                    finish_id,
                    actual_size: page.len() as u32,
                });
            }
        }

        debug!(
            source = scope.source(),
            batches = planned.len(),
            batch_size = self.batch_size,
            "Planned batches"
        );
        Ok(planned)
    }
}
