//! Warehouse sink - DDL and batched inserts into the relational warehouse

use crate::error::{IngestError, Result};
use crate::ingestion::cell::CleanValue;
use crate::ingestion::table_builder::DestinationTable;
use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use sqlx::Connection;
use tracing::debug;

/// One warehouse connection, owned by a single job.
#[async_trait]
pub trait Warehouse: Send {
    /// Idempotent `CREATE TABLE IF NOT EXISTS`.
    async fn create_table(&mut self, table: &DestinationTable) -> Result<()>;

    /// One multi-row INSERT. Rows are already cleaned and as wide as the table.
    async fn insert_batch(&mut self, table: &DestinationTable, rows: &[Vec<CleanValue>]) -> Result<()>;

    /// Release the connection. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// Opens a fresh connection per job.
#[async_trait]
pub trait WarehouseConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Warehouse>>;
}

/// Postgres-compatible warehouse over a dedicated connection.
pub struct PgWarehouse {
    conn: Option<PgConnection>,
}

impl PgWarehouse {
    pub async fn connect(url: &str) -> Result<Self> {
        let conn = PgConnection::connect(url)
            .await
            .map_err(|e| IngestError::Warehouse(format!("Failed to connect: {}", e)))?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| IngestError::Warehouse("connection already closed".to_string()))
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn create_table(&mut self, table: &DestinationTable) -> Result<()> {
        let sql = table.create_sql();
        debug!(sql = %sql, "executing DDL");
        sqlx::query(&sql)
            .execute(self.conn()?)
            .await
            .map_err(|e| IngestError::Warehouse(format!("Failed to create {}: {}", table.name, e)))?;
        Ok(())
    }

    async fn insert_batch(&mut self, table: &DestinationTable, rows: &[Vec<CleanValue>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let sql = table.insert_sql(rows.len());
        let mut query = sqlx::query(&sql);
        for row in rows {
            for value in row {
                query = query.bind(value.to_sql_text());
            }
        }
        query
            .execute(self.conn()?)
            .await
            .map_err(|e| IngestError::Warehouse(format!("Failed to insert into {}: {}", table.name, e)))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|e| IngestError::Warehouse(format!("Failed to close connection: {}", e)))?;
        }
        Ok(())
    }
}

pub struct PgWarehouseConnector {
    url: String,
}

impl PgWarehouseConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl WarehouseConnector for PgWarehouseConnector {
    async fn connect(&self) -> Result<Box<dyn Warehouse>> {
        Ok(Box::new(PgWarehouse::connect(&self.url).await?))
    }
}
