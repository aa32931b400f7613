//! Batch Loader - cleans rows and flushes them in parameter-safe INSERTs

use crate::config::IngestConfig;
use crate::db::job_repo::JobStore;
use crate::db::warehouse::Warehouse;
use crate::error::Result;
use crate::ingestion::cell::{CellValue, CleanValue};
use crate::ingestion::table_builder::DestinationTable;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Accumulates cleaned rows and writes them one batch at a time, in order.
///
/// A failed batch is retried with the same rows until `insert_attempts` is
/// used up; the last error then aborts the load. Batches already written stay
/// in the table.
pub struct BatchLoader {
    job_id: Uuid,
    table: DestinationTable,
    jobs: Arc<dyn JobStore>,
    batch_size: usize,
    insert_attempts: u32,
    progress_interval: u64,
    pending: Vec<Vec<CleanValue>>,
    rows_accepted: u64,
    rows_loaded: u64,
    batches_flushed: u64,
}

impl BatchLoader {
    pub fn new(
        job_id: Uuid,
        table: DestinationTable,
        jobs: Arc<dyn JobStore>,
        batch_size: usize,
        config: &IngestConfig,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            job_id,
            table,
            jobs,
            batch_size,
            insert_attempts: config.insert_attempts.max(1),
            progress_interval: config.progress_interval.max(1),
            pending: Vec::with_capacity(batch_size),
            rows_accepted: 0,
            rows_loaded: 0,
            batches_flushed: 0,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Rows committed to the warehouse so far.
    pub fn rows_loaded(&self) -> u64 {
        self.rows_loaded
    }

    pub fn table(&self) -> &DestinationTable {
        &self.table
    }

    /// Queue one source row, flushing when the batch is full.
    pub async fn push(&mut self, warehouse: &mut dyn Warehouse, row: &[CellValue]) -> Result<()> {
        let width = self.table.columns.len();
        let mut cleaned: Vec<CleanValue> = row.iter().take(width).map(CellValue::clean).collect();
        cleaned.resize(width, CleanValue::Null);
        self.pending.push(cleaned);
        self.rows_accepted += 1;

        if self.pending.len() >= self.batch_size {
            self.flush(warehouse).await?;
        }
        if self.rows_accepted % self.progress_interval == 0 {
            self.report_progress().await;
        }
        Ok(())
    }

    /// Flush whatever is left and return the number of rows loaded.
    pub async fn finish(mut self, warehouse: &mut dyn Warehouse) -> Result<u64> {
        self.flush(warehouse).await?;
        debug!(
            rows = self.rows_loaded,
            batches = self.batches_flushed,
            "batch loader finished"
        );
        Ok(self.rows_loaded)
    }

    async fn flush(&mut self, warehouse: &mut dyn Warehouse) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        let batch_number = self.batches_flushed + 1;

        let mut attempt = 1;
        loop {
            match warehouse.insert_batch(&self.table, &batch).await {
                Ok(()) => break,
                Err(e) if attempt < self.insert_attempts => {
                    warn!(
                        batch = batch_number,
                        attempt,
                        rows = batch.len(),
                        error = %e,
                        "batch insert failed, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        batch = batch_number,
                        attempts = attempt,
                        rows = batch.len(),
                        error = %e,
                        "batch insert failed"
                    );
                    return Err(e);
                }
            }
        }

        self.rows_loaded += batch.len() as u64;
        self.batches_flushed = batch_number;
        debug!(batch = batch_number, rows = batch.len(), total = self.rows_loaded, "batch flushed");
        Ok(())
    }

    /// Best effort; a failed progress write never stops the load.
    async fn report_progress(&self) {
        if let Err(e) = self.jobs.update_progress(self.job_id, self.rows_accepted).await {
            warn!(rows = self.rows_accepted, error = %e, "progress update failed");
        }
    }
}
