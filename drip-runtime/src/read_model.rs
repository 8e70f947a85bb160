//! Read models for operator-facing listings and progress

use crate::converters::BackfillRun;
use drip_core::BackfillStatus;
use serde::Serialize;

/// Number of page links shown around the current page
const PAGE_WINDOW: i64 = 5;

/// Page metadata for a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub current_page: i64,
    pub per_page: i64,
    pub total_count: i64,
    pub total_pages: i64,
}

impl Pagination {
    /// Pagination for `total_count` items; pages below 1 are treated as 1
    pub fn new(page: i64, per_page: i64, total_count: i64) -> Self {
        let per_page = per_page.max(1);
        let total_count = total_count.max(0);
        Self {
            current_page: page.max(1),
            per_page,
            total_count,
            total_pages: (total_count + per_page - 1) / per_page,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.current_page - 1) * self.per_page
    }

    pub fn has_previous(&self) -> bool {
        self.current_page > 1
    }

    pub fn has_next(&self) -> bool {
        self.current_page < self.total_pages
    }

    pub fn previous_page(&self) -> Option<i64> {
        self.has_previous().then(|| self.current_page - 1)
    }

    pub fn next_page(&self) -> Option<i64> {
        self.has_next().then(|| self.current_page + 1)
    }

    /// Up to five page numbers starting two before the current page
    pub fn window(&self) -> Vec<i64> {
        if self.total_pages == 0 {
            return Vec::new();
        }
        let start = (self.current_page - 2).max(1);
        let end = (start + PAGE_WINDOW - 1).min(self.total_pages);
        (start..=end).collect()
    }
}

/// One page of items with its pagination metadata
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// Progress snapshot of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunProgress {
    pub status: BackfillStatus,
    pub processed_count: i64,
    pub total_count: Option<i64>,
    pub error_message: Option<String>,
}

impl RunProgress {
    /// Processed share in percent, once the total is known
    pub fn percent(&self) -> Option<f64> {
        match self.total_count {
            Some(0) => Some(100.0),
            Some(total) => Some(self.processed_count as f64 * 100.0 / total as f64),
            None => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

impl From<&BackfillRun> for RunProgress {
    fn from(run: &BackfillRun) -> Self {
        Self {
            status: run.status,
            processed_count: run.processed_count,
            total_count: run.total_count,
            error_message: run.error_message.clone(),
        }
    }
}
