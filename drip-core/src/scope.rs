//! Record scopes
//!
//! A [`Scope`] describes a lazily-evaluated selection of records: a source
//! (table), a list of predicates, an optional inclusive primary-key range and an
//! optional limit. Scopes are plain data; a [`RecordStore`](crate::RecordStore)
//! adapter translates them into its native query form.
//!
//! Evaluation order is: predicates and range, ordered by ascending id, then limit.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Primary key of a record
pub type RecordId = i64;

/// A single record from the target store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: RecordId, fields: Map<String, Value>) -> Self {
        Self { id, fields }
    }

    /// Get a field value (`id` resolves to the primary key)
    pub fn get(&self, field: &str) -> Option<Value> {
        if field == "id" {
            return Some(Value::from(self.id));
        }
        self.fields.get(field).cloned()
    }
}

/// Field assignments applied by `update` / `update_all`
pub type FieldChanges = Map<String, Value>;

/// Comparison operator of a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    NotEq,
    In,
    Lt,
    Lte,
    Gt,
    Gte,
    IsNull,
}

/// A `(field, operator, value)` filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOp::IsNull, Value::Null)
    }

    /// Evaluate this predicate against a record
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field).unwrap_or(Value::Null);

        match self.op {
            FilterOp::IsNull => actual.is_null(),
            FilterOp::Eq => values_equal(&actual, &self.value),
            FilterOp::NotEq => !actual.is_null() && !values_equal(&actual, &self.value),
            FilterOp::In => match &self.value {
                Value::Array(candidates) => {
                    candidates.iter().any(|candidate| values_equal(&actual, candidate))
                }
                other => values_equal(&actual, other),
            },
            FilterOp::Lt => compare_values(&actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare_values(&actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => compare_values(&actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare_values(&actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => l == r,
            _ => l.as_f64() == r.as_f64(),
        },
        _ => left == right,
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        // ISO-8601 dates and date-times order lexicographically
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// Inclusive primary-key range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub start_id: RecordId,
    pub finish_id: RecordId,
}

impl IdRange {
    pub fn new(start_id: RecordId, finish_id: RecordId) -> Self {
        Self {
            start_id,
            finish_id,
        }
    }

    pub fn contains(&self, id: RecordId) -> bool {
        id >= self.start_id && id <= self.finish_id
    }

    /// Intersection of two ranges, empty ranges have `start_id > finish_id`
    pub fn intersect(&self, other: &IdRange) -> IdRange {
        IdRange {
            start_id: self.start_id.max(other.start_id),
            finish_id: self.finish_id.min(other.finish_id),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start_id > self.finish_id
    }
}

/// Lazily-evaluated, filterable selection of records ordered by primary key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    source: String,
    predicates: Vec<Predicate>,
    range: Option<IdRange>,
    limit: Option<u64>,
}

impl Scope {
    /// Select every record of `source`
    pub fn from(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            predicates: Vec::new(),
            range: None,
            limit: None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn range(&self) -> Option<IdRange> {
        self.range
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    /// Add a predicate
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Add an equality predicate
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Predicate::eq(field, value))
    }

    /// Add a batch of predicates, typically produced by an options schema
    pub fn apply(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    /// Cap the selection to the first `n` records by ascending id
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(self.limit.map_or(n, |current| current.min(n)));
        self
    }

    pub fn without_limit(mut self) -> Self {
        self.limit = None;
        self
    }

    /// Intersect with the inclusive `[start_id, finish_id]` range
    pub fn restrict_to_range(mut self, start_id: RecordId, finish_id: RecordId) -> Self {
        let requested = IdRange::new(start_id, finish_id);
        self.range = Some(match self.range {
            Some(current) => current.intersect(&requested),
            None => requested,
        });
        self
    }

    /// Check predicates and range (the limit is positional and not checked here)
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(range) = self.range {
            if !range.contains(record.id) {
                return false;
            }
        }
        self.predicates.iter().all(|p| p.matches(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: RecordId, value: Value) -> Record {
        match value {
            Value::Object(fields) => Record::new(id, fields),
            _ => Record::new(id, Map::new()),
        }
    }

    #[test]
    fn test_equality_coerces_numbers() {
        let r = record(1, json!({"age": 25}));
        assert!(Predicate::eq("age", 25.0).matches(&r));
        assert!(!Predicate::eq("age", 30).matches(&r));
    }

    #[test]
    fn test_in_and_null_predicates() {
        let r = record(2, json!({"color": "red", "role": null}));
        assert!(Predicate::new("color", FilterOp::In, json!(["red", "green"])).matches(&r));
        assert!(!Predicate::new("color", FilterOp::In, json!(["blue"])).matches(&r));
        assert!(Predicate::is_null("role").matches(&r));
        assert!(Predicate::is_null("missing").matches(&r));
    }

    #[test]
    fn test_ordering_predicates() {
        let r = record(3, json!({"hired_on": "2020-05-01", "age": 40}));
        assert!(Predicate::new("hired_on", FilterOp::Lt, "2021-01-01").matches(&r));
        assert!(Predicate::new("age", FilterOp::Gte, 40).matches(&r));
        assert!(!Predicate::new("age", FilterOp::Gt, 40).matches(&r));
        assert!(Predicate::new("id", FilterOp::Lte, 3).matches(&r));
    }

    #[test]
    fn test_range_intersection() {
        let scope = Scope::from("employees")
            .restrict_to_range(1, 10)
            .restrict_to_range(5, 20);
        assert_eq!(scope.range(), Some(IdRange::new(5, 10)));
        assert!(scope.matches(&record(7, json!({}))));
        assert!(!scope.matches(&record(11, json!({}))));
    }

    #[test]
    fn test_limit_keeps_smallest() {
        let scope = Scope::from("employees").limit(10).limit(3).limit(5);
        assert_eq!(scope.limit_value(), Some(3));
        assert_eq!(scope.without_limit().limit_value(), None);
    }
}
