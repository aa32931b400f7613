//! Job metadata repository over the `import_jobs` table

use crate::error::{IngestError, Result};
use crate::ingestion::job::{ImportJob, JobStatus};
use crate::ingestion::schema_inference::ColumnMetadata;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Read/write access to job records.
///
/// Every write is an absolute update keyed by id, so repeating one is harmless.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Register a new job in `queued`.
    async fn create(&self, job_id: Uuid, source_ref: &str) -> Result<()>;

    async fn get(&self, job_id: Uuid) -> Result<Option<ImportJob>>;

    async fn set_status(&self, job_id: Uuid, status: JobStatus) -> Result<()>;

    /// Running row count. Never moves the stored count backwards.
    async fn update_progress(&self, job_id: Uuid, total_rows: u64) -> Result<()>;

    async fn complete(&self, job_id: Uuid, total_rows: u64, columns: &[ColumnMetadata]) -> Result<()>;

    async fn fail(&self, job_id: Uuid, error_message: &str) -> Result<()>;
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `import_jobs` table if it does not exist yet.
    pub async fn ensure_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS import_jobs (
                id UUID PRIMARY KEY,
                source_ref TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                total_rows BIGINT NOT NULL DEFAULT 0,
                columns JSONB,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    fn expect_row(job_id: Uuid, rows_affected: u64) -> Result<()> {
        if rows_affected == 0 {
            return Err(IngestError::JobStore(format!("job {} not found", job_id)));
        }
        Ok(())
    }
}

fn store_error(err: sqlx::Error) -> IngestError {
    IngestError::JobStore(err.to_string())
}

fn to_db_count(total_rows: u64) -> i64 {
    i64::try_from(total_rows).unwrap_or(i64::MAX)
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job_id: Uuid, source_ref: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO import_jobs (id, source_ref, status)
            VALUES ($1, $2, 'queued')
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(source_ref)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ImportJob>> {
        let row = sqlx::query(
            r#"
            SELECT id, source_ref, status, total_rows, columns, error_message
            FROM import_jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("status").map_err(store_error)?;
        let total_rows: i64 = row.try_get("total_rows").map_err(store_error)?;
        let columns: Option<serde_json::Value> = row.try_get("columns").map_err(store_error)?;
        let columns = match columns {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        };

        Ok(Some(ImportJob {
            id: row.try_get("id").map_err(store_error)?,
            source_ref: row.try_get("source_ref").map_err(store_error)?,
            status: status.parse()?,
            total_rows: u64::try_from(total_rows).unwrap_or(0),
            columns,
            error_message: row.try_get("error_message").map_err(store_error)?,
        }))
    }

    async fn set_status(&self, job_id: Uuid, status: JobStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Self::expect_row(job_id, result.rows_affected())
    }

    async fn update_progress(&self, job_id: Uuid, total_rows: u64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET total_rows = GREATEST(total_rows, $2), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(to_db_count(total_rows))
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Self::expect_row(job_id, result.rows_affected())
    }

    async fn complete(&self, job_id: Uuid, total_rows: u64, columns: &[ColumnMetadata]) -> Result<()> {
        let columns = serde_json::to_value(columns)?;
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = 'completed',
                total_rows = GREATEST(total_rows, $2),
                columns = $3,
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(to_db_count(total_rows))
        .bind(columns)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Self::expect_row(job_id, result.rows_affected())
    }

    async fn fail(&self, job_id: Uuid, error_message: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = 'failed', error_message = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Self::expect_row(job_id, result.rows_affected())
    }
}
