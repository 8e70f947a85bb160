//! PostgreSQL storage implementation

use crate::models::{BackfillRunBatchModel, BackfillRunModel};
use crate::store::{validate_batch, validate_pagination_params, validate_run, validate_transition, RunStore};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use drip_core::BackfillStatus;
use futures::future::BoxFuture;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use std::time::Instant;
use tracing::{error, instrument, warn};
use uuid::Uuid;

const RUN_COLUMNS: &str = r#"
    id, backfill_class_name, options, batch_size, amount_of_elements, start_at, status,
    total_count, processed_count, error_message, backfiller_id, created_at, updated_at
"#;

const BATCH_COLUMNS: &str = r#"
    id, backfill_run_id, start_id, finish_id, batch_size, status, error_message,
    created_at, updated_at
"#;

/// Configuration for the PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 30,
            idle_timeout_secs: None,
            max_lifetime_secs: None,
        }
    }
}

/// PostgreSQL storage backend for runs and batches
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Create a new PostgreSQL storage instance with default configuration
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_pool_config(database_url, PoolConfig::default()).await
    }

    /// Create a new PostgreSQL storage instance using a PoolConfig
    pub async fn with_pool_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        if config.min_connections == 0 {
            return Err(crate::Error::ValidationError(
                "min_connections must be > 0".to_string(),
            ));
        }
        if config.max_connections == 0 || config.max_connections < config.min_connections {
            return Err(crate::Error::ValidationError(
                "max_connections must be >= min_connections and > 0".to_string(),
            ));
        }

        let mut opts = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_secs));

        if let Some(idle) = config.idle_timeout_secs {
            opts = opts.idle_timeout(std::time::Duration::from_secs(idle));
        }
        if let Some(max_life) = config.max_lifetime_secs {
            opts = opts.max_lifetime(std::time::Duration::from_secs(max_life));
        }

        let pool = opts.connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Execute a closure within a transaction
    ///
    /// Commits on success, rolls back on error.
    async fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut Transaction<'_, Postgres>) -> BoxFuture<'c, Result<T>> + Send,
        T: Send,
    {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;

        let result = match f(&mut tx).await {
            Ok(result) => {
                tx.commit().await?;
                Ok(result)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        };

        // Log slow operations (>100ms)
        let elapsed = start.elapsed();
        if elapsed.as_millis() > 100 {
            warn!(
                duration_ms = elapsed.as_millis(),
                "Slow database operation detected"
            );
        }

        result
    }

    /// Check database connectivity
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }
}

/// Explain a compare-and-set miss: the row is gone or its status moved on
async fn stale_or_missing(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    label: &str,
    id: Uuid,
    expected: BackfillStatus,
) -> crate::Error {
    let query = format!("SELECT status FROM {} WHERE id = $1", table);
    match sqlx::query_as::<_, (String,)>(&query)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
    {
        Ok(Some((actual,))) => crate::Error::StaleStatus(format!(
            "{} {} is '{}', expected '{}'",
            label, id, actual, expected
        )),
        Ok(None) => crate::Error::NotFound(format!("{} {}", label, id)),
        Err(e) => map_db_error(e),
    }
}

#[async_trait]
impl RunStore for PostgresStorage {
    #[instrument(
        skip(self, run),
        fields(
            db.system = "postgresql",
            db.operation = "INSERT",
            db.sql.table = "backfill_runs",
            run_id = %run.id
        )
    )]
    async fn insert_run(&self, run: &BackfillRunModel) -> Result<()> {
        validate_run(run)?;
        let run = run.clone();

        self.with_transaction(|tx| {
            Box::pin(async move {
                sqlx::query(
                    r#"
                    INSERT INTO backfill_runs (
                        id, backfill_class_name, options, batch_size, amount_of_elements, start_at,
                        status, total_count, processed_count, error_message, backfiller_id,
                        created_at, updated_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    "#,
                )
                .bind(run.id)
                .bind(&run.backfill_class_name)
                .bind(&run.options)
                .bind(run.batch_size)
                .bind(run.amount_of_elements)
                .bind(run.start_at)
                .bind(&run.status)
                .bind(run.total_count)
                .bind(run.processed_count)
                .bind(&run.error_message)
                .bind(&run.backfiller_id)
                .bind(run.created_at)
                .bind(run.updated_at)
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;

                Ok(())
            })
        })
        .await
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", db.sql.table = "backfill_runs")
    )]
    async fn get_run(&self, id: Uuid) -> Result<BackfillRunModel> {
        let query = format!("SELECT {} FROM backfill_runs WHERE id = $1", RUN_COLUMNS);

        sqlx::query_as::<_, BackfillRunModel>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| crate::Error::NotFound(format!("Backfill run {}", id)))
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", db.sql.table = "backfill_runs")
    )]
    async fn list_runs(&self, limit: i64, offset: i64) -> Result<Vec<BackfillRunModel>> {
        validate_pagination_params(limit, offset)?;
        let query = format!(
            "SELECT {} FROM backfill_runs ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
            RUN_COLUMNS
        );

        let runs = sqlx::query_as::<_, BackfillRunModel>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;

        Ok(runs)
    }

    async fn count_runs(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM backfill_runs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(count.0)
    }

    #[instrument(
        skip(self, error_message),
        fields(
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.sql.table = "backfill_runs",
            run_id = %id,
            from = %from,
            to = %to
        )
    )]
    async fn transition_run_status(
        &self,
        id: Uuid,
        from: BackfillStatus,
        to: BackfillStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        validate_transition(from, to)?;
        let error_message = error_message.map(|s| s.to_string());
        let now = Utc::now();

        self.with_transaction(|tx| {
            Box::pin(async move {
                let result = sqlx::query(
                    r#"
                    UPDATE backfill_runs
                    SET status = $1,
                        error_message = CASE
                            WHEN $1 = 'running' THEN $2
                            ELSE COALESCE($2, error_message)
                        END,
                        updated_at = $3
                    WHERE id = $4 AND status = $5
                    "#,
                )
                .bind(to.as_str())
                .bind(&error_message)
                .bind(now)
                .bind(id)
                .bind(from.as_str())
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;

                if result.rows_affected() == 0 {
                    return Err(stale_or_missing(tx, "backfill_runs", "Backfill run", id, from).await);
                }

                Ok(())
            })
        })
        .await
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "UPDATE", db.sql.table = "backfill_runs")
    )]
    async fn record_run_plan(&self, id: Uuid, total_count: i64, batch_size: i32) -> Result<()> {
        if batch_size <= 0 {
            return Err(crate::Error::ValidationError(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        let result = sqlx::query(
            r#"
            UPDATE backfill_runs
            SET total_count = $1, batch_size = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(total_count)
        .bind(batch_size)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(crate::Error::NotFound(format!("Backfill run {}", id)));
        }
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "UPDATE", db.sql.table = "backfill_runs")
    )]
    async fn increment_processed_count(&self, id: Uuid, by: i64) -> Result<i64> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE backfill_runs
            SET processed_count = processed_count + $1, updated_at = NOW()
            WHERE id = $2
            RETURNING processed_count
            "#,
        )
        .bind(by)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        row.map(|(count,)| count)
            .ok_or_else(|| crate::Error::NotFound(format!("Backfill run {}", id)))
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "DELETE", db.sql.table = "backfill_runs")
    )]
    async fn delete_run(&self, id: Uuid, expected: BackfillStatus) -> Result<()> {
        self.with_transaction(|tx| {
            Box::pin(async move {
                // Batches go with the run through ON DELETE CASCADE
                let result = sqlx::query(
                    r#"
                    DELETE FROM backfill_runs
                    WHERE id = $1 AND status = $2
                    "#,
                )
                .bind(id)
                .bind(expected.as_str())
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;

                if result.rows_affected() == 0 {
                    return Err(
                        stale_or_missing(tx, "backfill_runs", "Backfill run", id, expected).await,
                    );
                }

                Ok(())
            })
        })
        .await
    }

    #[instrument(
        skip(self, batches),
        fields(
            db.system = "postgresql",
            db.operation = "INSERT",
            db.sql.table = "backfill_run_batches",
            batch_count = batches.len()
        )
    )]
    async fn create_batches(&self, batches: &[BackfillRunBatchModel]) -> Result<()> {
        if batches.is_empty() {
            return Ok(());
        }

        for batch in batches {
            validate_batch(batch)?;
        }

        let batches = batches.to_vec();

        self.with_transaction(|tx| {
            Box::pin(async move {
                for batch in batches {
                    sqlx::query(
                        r#"
                        INSERT INTO backfill_run_batches (
                            id, backfill_run_id, start_id, finish_id, batch_size, status,
                            error_message, created_at, updated_at
                        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                        "#,
                    )
                    .bind(batch.id)
                    .bind(batch.backfill_run_id)
                    .bind(batch.start_id)
                    .bind(batch.finish_id)
                    .bind(batch.batch_size)
                    .bind(&batch.status)
                    .bind(&batch.error_message)
                    .bind(batch.created_at)
                    .bind(batch.updated_at)
                    .execute(&mut **tx)
                    .await
                    .map_err(map_db_error)?;
                }

                Ok(())
            })
        })
        .await
    }

    async fn get_batch(&self, id: Uuid) -> Result<BackfillRunBatchModel> {
        let query = format!("SELECT {} FROM backfill_run_batches WHERE id = $1", BATCH_COLUMNS);

        sqlx::query_as::<_, BackfillRunBatchModel>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| crate::Error::NotFound(format!("Backfill run batch {}", id)))
    }

    #[instrument(
        skip(self),
        fields(
            db.system = "postgresql",
            db.operation = "SELECT",
            db.sql.table = "backfill_run_batches",
            run_id = %run_id
        )
    )]
    async fn list_batches(
        &self,
        run_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BackfillRunBatchModel>> {
        validate_pagination_params(limit, offset)?;
        let query = format!(
            r#"
            SELECT {}
            FROM backfill_run_batches
            WHERE backfill_run_id = $1
            ORDER BY created_at DESC, start_id DESC
            LIMIT $2 OFFSET $3
            "#,
            BATCH_COLUMNS
        );

        let batches = sqlx::query_as::<_, BackfillRunBatchModel>(&query)
            .bind(run_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;

        Ok(batches)
    }

    async fn count_batches(&self, run_id: Uuid) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM backfill_run_batches WHERE backfill_run_id = $1
            "#,
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(count.0)
    }

    async fn count_incomplete_batches(&self, run_id: Uuid) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM backfill_run_batches
            WHERE backfill_run_id = $1 AND status <> 'completed'
            "#,
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(count.0)
    }

    #[instrument(
        skip(self, error_message),
        fields(
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.sql.table = "backfill_run_batches",
            batch_id = %id,
            from = %from,
            to = %to
        )
    )]
    async fn transition_batch_status(
        &self,
        id: Uuid,
        from: BackfillStatus,
        to: BackfillStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        validate_transition(from, to)?;
        let error_message = error_message.map(|s| s.to_string());
        let now = Utc::now();

        self.with_transaction(|tx| {
            Box::pin(async move {
                let result = sqlx::query(
                    r#"
                    UPDATE backfill_run_batches
                    SET status = $1,
                        error_message = CASE
                            WHEN $1 = 'running' THEN $2
                            ELSE COALESCE($2, error_message)
                        END,
                        updated_at = $3
                    WHERE id = $4 AND status = $5
                    "#,
                )
                .bind(to.as_str())
                .bind(&error_message)
                .bind(now)
                .bind(id)
                .bind(from.as_str())
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;

                if result.rows_affected() == 0 {
                    return Err(stale_or_missing(
                        tx,
                        "backfill_run_batches",
                        "Backfill run batch",
                        id,
                        from,
                    )
                    .await);
                }

                Ok(())
            })
        })
        .await
    }
}

pub(crate) fn map_db_error(err: sqlx::Error) -> crate::Error {
    match &err {
        sqlx::Error::RowNotFound => {
            return crate::Error::NotFound("Row not found".to_string());
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            error!(error = %err, "Connection pool unavailable");
            return crate::Error::Database(err);
        }
        _ => {}
    }

    // Map PostgreSQL-specific errors
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code().as_deref() {
            match code {
                // unique_violation - duplicate key
                "23505" => {
                    warn!(
                        error_code = code,
                        message = db_err.message(),
                        "Unique constraint violation"
                    );
                    return crate::Error::AlreadyExists(db_err.message().to_string());
                }
                // foreign_key_violation - referenced run doesn't exist
                "23503" => {
                    warn!(
                        error_code = code,
                        message = db_err.message(),
                        "Foreign key violation"
                    );
                    return crate::Error::NotFound(db_err.message().to_string());
                }
                // not_null_violation - required field is null
                "23502" => {
                    warn!(
                        error_code = code,
                        message = db_err.message(),
                        "Not null violation"
                    );
                    return crate::Error::ValidationError(format!(
                        "Required field cannot be null: {}",
                        db_err.message()
                    ));
                }
                // check_violation - CHECK constraint failed
                "23514" => {
                    warn!(
                        error_code = code,
                        message = db_err.message(),
                        "CHECK constraint violation"
                    );
                    return crate::Error::ValidationError(format!(
                        "Constraint violation: {}",
                        db_err.message()
                    ));
                }
                _ => {
                    error!(
                        error_code = code,
                        message = db_err.message(),
                        "Unhandled database error"
                    );
                }
            }
        }
    }

    crate::Error::Database(err)
}
