//! PostgreSQL record store adapter
//!
//! Translates [`Scope`]s into SQL over an application table. Predicates compare
//! the column's JSONB form against the bound JSON value, so numbers compare
//! numerically and ISO-8601 strings lexicographically, matching the in-memory
//! store. Updates are applied through `jsonb_populate_record`, which casts each
//! JSON value to the column's declared type.

use async_trait::async_trait;
use drip_core::{FieldChanges, FilterOp, Record, RecordId, RecordStore, Scope};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex")
});

/// Record store over application tables in PostgreSQL
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
    primary_key: String,
}

impl PostgresRecordStore {
    /// Create a store whose tables use an `id` primary key
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            primary_key: "id".to_string(),
        }
    }

    /// Use a different primary key column
    pub fn with_primary_key(mut self, column: impl Into<String>) -> drip_core::Result<Self> {
        let column = column.into();
        quote_identifier(&column)?;
        self.primary_key = column;
        Ok(self)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// `SELECT * FROM table WHERE <predicates, range> ORDER BY pk LIMIT n`
    fn push_selection(&self, qb: &mut QueryBuilder<'_, Postgres>, scope: &Scope) -> drip_core::Result<()> {
        let table = quote_table(scope.source())?;
        let pk = quote_identifier(&self.primary_key)?;

        qb.push(format!("SELECT * FROM {} s WHERE TRUE", table));

        if let Some(range) = scope.range() {
            qb.push(format!(" AND s.{} BETWEEN ", pk));
            qb.push_bind(range.start_id);
            qb.push(" AND ");
            qb.push_bind(range.finish_id);
        }

        for predicate in scope.predicates() {
            let column = if predicate.field == "id" {
                pk.clone()
            } else {
                quote_identifier(&predicate.field)?
            };
            let jsonb = format!("to_jsonb(s.{})", column);

            match predicate.op {
                FilterOp::IsNull => {
                    qb.push(format!(" AND s.{} IS NULL", column));
                }
                FilterOp::In => {
                    let candidates = match &predicate.value {
                        Value::Array(_) => predicate.value.clone(),
                        other => Value::Array(vec![other.clone()]),
                    };
                    qb.push(" AND ");
                    qb.push_bind(candidates);
                    qb.push(format!("::jsonb @> jsonb_build_array({})", jsonb));
                }
                FilterOp::NotEq => {
                    qb.push(format!(" AND s.{} IS NOT NULL AND {} <> ", column, jsonb));
                    qb.push_bind(predicate.value.clone());
                    qb.push("::jsonb");
                }
                op => {
                    let operator = match op {
                        FilterOp::Eq => "=",
                        FilterOp::Lt => "<",
                        FilterOp::Lte => "<=",
                        FilterOp::Gt => ">",
                        _ => ">=",
                    };
                    qb.push(format!(" AND {} {} ", jsonb, operator));
                    qb.push_bind(predicate.value.clone());
                    qb.push("::jsonb");
                }
            }
        }

        qb.push(format!(" ORDER BY s.{} ASC", pk));
        if let Some(limit) = scope.limit_value() {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }

        Ok(())
    }
}

/// Quote a column name after validating it
fn quote_identifier(name: &str) -> drip_core::Result<String> {
    if IDENTIFIER.is_match(name) {
        Ok(format!("\"{}\"", name))
    } else {
        Err(drip_core::Error::InvalidScope(format!(
            "invalid identifier '{}'",
            name
        )))
    }
}

/// Quote a possibly schema-qualified table name
fn quote_table(name: &str) -> drip_core::Result<String> {
    let parts = name
        .split('.')
        .map(quote_identifier)
        .collect::<drip_core::Result<Vec<_>>>()?;
    if parts.len() > 2 {
        return Err(drip_core::Error::InvalidScope(format!(
            "invalid table name '{}'",
            name
        )));
    }
    Ok(parts.join("."))
}

fn store_error(err: sqlx::Error) -> drip_core::Error {
    drip_core::Error::Store(err.to_string())
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    #[instrument(skip(self, scope), fields(db.system = "postgresql", source = scope.source()))]
    async fn count(&self, scope: &Scope) -> drip_core::Result<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM (");
        self.push_selection(&mut qb, scope)?;
        qb.push(") counted");

        let count: i64 = qb
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?
            .try_get(0)
            .map_err(store_error)?;

        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self, scope), fields(db.system = "postgresql", source = scope.source()))]
    async fn fetch_page(
        &self,
        scope: &Scope,
        after: Option<RecordId>,
        limit: usize,
    ) -> drip_core::Result<Vec<Record>> {
        let pk = quote_identifier(&self.primary_key)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT t.{}::BIGINT AS record_id, to_jsonb(t) AS fields FROM (",
            pk
        ));
        self.push_selection(&mut qb, scope)?;
        qb.push(") t WHERE TRUE");
        if let Some(cursor) = after {
            qb.push(format!(" AND t.{} > ", pk));
            qb.push_bind(cursor);
        }
        qb.push(format!(" ORDER BY t.{} ASC LIMIT ", pk));
        qb.push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await.map_err(store_error)?;
        debug!(rows = rows.len(), "Fetched record page");

        rows.into_iter()
            .map(|row| {
                let id: i64 = row.try_get("record_id").map_err(store_error)?;
                let fields: Value = row.try_get("fields").map_err(store_error)?;
                let mut fields = match fields {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                fields.remove(&self.primary_key);
                Ok(Record::new(id, fields))
            })
            .collect()
    }

    #[instrument(skip(self, scope, changes), fields(db.system = "postgresql", source = scope.source()))]
    async fn update_all(&self, scope: &Scope, changes: &FieldChanges) -> drip_core::Result<u64> {
        if changes.is_empty() {
            return Ok(0);
        }

        let table = quote_table(scope.source())?;
        let pk = quote_identifier(&self.primary_key)?;
        let columns = changes
            .keys()
            .map(|key| quote_identifier(key))
            .collect::<drip_core::Result<Vec<_>>>()?
            .join(", ");

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "UPDATE {table} SET ({columns}) = (SELECT {columns} FROM jsonb_populate_record(NULL::{table}, "
        ));
        qb.push_bind(Value::Object(changes.clone()));
        qb.push(format!("::jsonb)) WHERE {} IN (SELECT sel.{} FROM (", pk, pk));
        self.push_selection(&mut qb, scope)?;
        qb.push(") sel)");

        let result = qb.build().execute(&self.pool).await.map_err(store_error)?;
        Ok(result.rows_affected())
    }

    async fn update(
        &self,
        source: &str,
        id: RecordId,
        changes: &FieldChanges,
    ) -> drip_core::Result<()> {
        let scope = Scope::from(source).restrict_to_range(id, id);
        let updated = self.update_all(&scope, changes).await?;
        if updated == 0 && !changes.is_empty() {
            return Err(drip_core::Error::Store(format!(
                "record {}#{} not found",
                source, id
            )));
        }
        Ok(())
    }
}
