//! Database connection management using sqlx

use crate::error::{IngestError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

pub type DbPool = PgPool;

/// Pool for the job metadata store.
pub async fn init_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await
        .map_err(|e| IngestError::JobStore(format!("Failed to connect: {}", e)))?;

    // Test the connection
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| IngestError::JobStore(format!("Connection check failed: {}", e)))?;

    info!("job store pool ready");
    Ok(pool)
}
