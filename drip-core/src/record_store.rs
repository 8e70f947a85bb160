//! Record store abstraction
//!
//! The record store is the live data a backfill mutates. It is an external
//! collaborator: the orchestrator only counts, pages through and updates records
//! via this trait.

use crate::scope::{FieldChanges, Record, RecordId, Scope};
use crate::Result;
use async_trait::async_trait;

/// Access to the records a backfill selects and mutates.
///
/// Implementations should:
/// - Evaluate predicates and the id range before applying the scope's limit
/// - Return pages in ascending primary-key order
/// - Never load more than `limit` records for a single `fetch_page` call
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Count the records selected by `scope` (limit included)
    async fn count(&self, scope: &Scope) -> Result<u64>;

    /// Fetch the next page of at most `limit` records with `id > after`
    async fn fetch_page(
        &self,
        scope: &Scope,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<Record>>;

    /// Apply `changes` to every record selected by `scope`, returning the number updated
    async fn update_all(&self, scope: &Scope, changes: &FieldChanges) -> Result<u64>;

    /// Apply `changes` to a single record
    async fn update(&self, source: &str, id: RecordId, changes: &FieldChanges) -> Result<()>;
}

/// One page of records, contiguous in the scope's id order
#[derive(Debug, Clone)]
pub struct Page {
    scope: Scope,
    records: Vec<Record>,
}

impl Page {
    /// Build a page from records fetched out of `base`.
    ///
    /// The page's own scope is `base` restricted to the page's id range, so bulk
    /// updates through [`Page::scope`] touch exactly these records.
    pub fn new(base: &Scope, records: Vec<Record>) -> Self {
        let scope = match (records.first(), records.last()) {
            (Some(first), Some(last)) => base.clone().without_limit().restrict_to_range(first.id, last.id),
            _ => base.clone(),
        };
        Self { scope, records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_id(&self) -> Option<RecordId> {
        self.records.first().map(|r| r.id)
    }

    pub fn last_id(&self) -> Option<RecordId> {
        self.records.last().map(|r| r.id)
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.records.iter().map(|r| r.id).collect()
    }
}
