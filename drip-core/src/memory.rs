//! In-memory record store for tests and local development

use crate::record_store::RecordStore;
use crate::scope::{FieldChanges, Record, RecordId, Scope};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Table = BTreeMap<RecordId, Map<String, Value>>;

/// Record store keeping every source table in a `BTreeMap` keyed by id.
///
/// Cloning shares the underlying tables.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    tables: Arc<RwLock<HashMap<String, Table>>>,
    page_fetches: Arc<AtomicUsize>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record
    pub fn insert(&self, source: &str, id: RecordId, fields: Value) {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.tables
            .write()
            .entry(source.to_string())
            .or_default()
            .insert(id, fields);
    }

    pub fn get(&self, source: &str, id: RecordId) -> Option<Record> {
        let tables = self.tables.read();
        tables
            .get(source)
            .and_then(|table| table.get(&id))
            .map(|fields| Record::new(id, fields.clone()))
    }

    /// All records of a source, ascending by id
    pub fn all(&self, source: &str) -> Vec<Record> {
        let tables = self.tables.read();
        tables
            .get(source)
            .map(|table| {
                table
                    .iter()
                    .map(|(id, fields)| Record::new(*id, fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of `fetch_page` calls served so far
    pub fn page_fetches(&self) -> usize {
        self.page_fetches.load(Ordering::SeqCst)
    }

    /// Ids selected by `scope`, honouring the limit
    fn selected_ids(&self, scope: &Scope) -> Vec<RecordId> {
        let tables = self.tables.read();
        let Some(table) = tables.get(scope.source()) else {
            return Vec::new();
        };

        let matching = scan(table, scope, None).map(|record| record.id);
        match scope.limit_value() {
            Some(limit) => matching.take(limit as usize).collect(),
            None => matching.collect(),
        }
    }
}

/// Records of `table` matched by `scope` in id order, starting after `after`.
///
/// Walks the table from the lower bound and stops past the scope's id range.
fn scan<'t>(
    table: &'t Table,
    scope: &'t Scope,
    after: Option<RecordId>,
) -> impl Iterator<Item = Record> + 't {
    let range = scope.range();
    let lower = match (after, range) {
        (Some(cursor), Some(r)) if cursor >= r.start_id => Bound::Excluded(cursor),
        (_, Some(r)) => Bound::Included(r.start_id),
        (Some(cursor), None) => Bound::Excluded(cursor),
        (None, None) => Bound::Unbounded,
    };

    table
        .range((lower, Bound::Unbounded))
        .take_while(move |(id, _)| range.map_or(true, |r| **id <= r.finish_id))
        .map(|(id, fields)| Record::new(*id, fields.clone()))
        .filter(move |record| scope.matches(record))
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn count(&self, scope: &Scope) -> Result<u64> {
        Ok(self.selected_ids(scope).len() as u64)
    }

    async fn fetch_page(
        &self,
        scope: &Scope,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<Record>> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);

        let tables = self.tables.read();
        let Some(table) = tables.get(scope.source()) else {
            return Ok(Vec::new());
        };

        // The limit counts from the start of the scope, not from the cursor
        let page: Vec<Record> = match scope.limit_value() {
            Some(cap) => scan(table, scope, None)
                .take(cap as usize)
                .filter(|record| after.map_or(true, |cursor| record.id > cursor))
                .take(limit)
                .collect(),
            None => scan(table, scope, after).take(limit).collect(),
        };
        Ok(page)
    }

    async fn update_all(&self, scope: &Scope, changes: &FieldChanges) -> Result<u64> {
        let ids = self.selected_ids(scope);
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(scope.source()) else {
            return Ok(0);
        };

        let mut updated = 0;
        for id in ids {
            if let Some(fields) = table.get_mut(&id) {
                for (key, value) in changes {
                    fields.insert(key.clone(), value.clone());
                }
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn update(&self, source: &str, id: RecordId, changes: &FieldChanges) -> Result<()> {
        let mut tables = self.tables.write();
        let fields = tables
            .get_mut(source)
            .and_then(|table| table.get_mut(&id))
            .ok_or_else(|| Error::Store(format!("record {}#{} not found", source, id)))?;

        for (key, value) in changes {
            fields.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}
