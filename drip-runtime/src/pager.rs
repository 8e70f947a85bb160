//! Keyset pagination over a scope

use crate::Result;
use drip_core::{Page, RecordId, RecordStore, Scope};

/// Walks a scope in ascending id order, one page at a time.
///
/// Only the current page is held in memory; the cursor is the last id seen.
pub struct KeysetPager<'a> {
    store: &'a dyn RecordStore,
    scope: Scope,
    page_size: usize,
    cursor: Option<RecordId>,
    exhausted: bool,
}

impl<'a> KeysetPager<'a> {
    pub fn new(store: &'a dyn RecordStore, scope: Scope, page_size: usize) -> Self {
        Self {
            store,
            scope,
            page_size: page_size.max(1),
            cursor: None,
            exhausted: false,
        }
    }

    /// Fetch the next page, or `None` once the scope is exhausted
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.exhausted {
            return Ok(None);
        }

        let records = self
            .store
            .fetch_page(&self.scope, self.cursor, self.page_size)
            .await?;

        if records.len() < self.page_size {
            self.exhausted = true;
        }
        if records.is_empty() {
            return Ok(None);
        }

        let page = Page::new(&self.scope, records);
        self.cursor = page.last_id();
        Ok(Some(page))
    }

    pub fn cursor(&self) -> Option<RecordId> {
        self.cursor
    }
}
