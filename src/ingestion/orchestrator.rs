//! Import Orchestrator - drives one job from download to a loaded table
//!
//! Flow per job:
//! 1. `downloading_file`: fetch the source into a scratch file (bounded retry)
//! 2. sniff the format, open the row stream, read the header and a sample
//! 3. `creating_table`: infer types and create the destination table once
//! 4. `inserting_rows`: drain the sample, then stream the rest in batches
//! 5. `completed` with the final row count and column list
//!
//! Any fatal error moves the job to `failed` with its message. The scratch
//! file and warehouse connection are released on both paths.

use crate::config::IngestConfig;
use crate::db::job_repo::JobStore;
use crate::db::warehouse::{Warehouse, WarehouseConnector};
use crate::error::{IngestError, Result};
use crate::ingestion::batch_loader::BatchLoader;
use crate::ingestion::cell::{is_blank_row, Row};
use crate::ingestion::job::{JobOutcome, JobStatus};
use crate::ingestion::row_stream::{open_row_stream, RowFeed, RowStream};
use crate::ingestion::schema_inference::{build_columns, header_names, SchemaInference};
use crate::ingestion::sniffer::{sniff_file, FileFormat};
use crate::ingestion::table_builder::{DestinationTable, TableMaterializer};
use crate::storage::{Downloader, ObjectStorage};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub struct ImportOrchestrator {
    storage: Arc<dyn ObjectStorage>,
    jobs: Arc<dyn JobStore>,
    warehouse: Arc<dyn WarehouseConnector>,
    downloader: Downloader,
    config: IngestConfig,
}

/// Resources a job owns until it reaches a terminal state.
#[derive(Default)]
struct JobResources {
    scratch: Option<NamedTempFile>,
    warehouse: Option<Box<dyn Warehouse>>,
}

impl JobResources {
    async fn release(&mut self) {
        if let Some(mut warehouse) = self.warehouse.take() {
            if let Err(e) = warehouse.close().await {
                warn!(error = %e, "closing warehouse connection failed");
            }
        }
        if let Some(scratch) = self.scratch.take() {
            if let Err(e) = scratch.close() {
                warn!(error = %e, "removing scratch file failed");
            }
        }
    }
}

/// Header, sample and the live remainder of the source.
struct SampledSource {
    headers: Vec<String>,
    sample: Vec<Row>,
    inference: SchemaInference,
    feed: RowFeed,
}

impl ImportOrchestrator {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        jobs: Arc<dyn JobStore>,
        warehouse: Arc<dyn WarehouseConnector>,
        config: IngestConfig,
    ) -> Self {
        Self {
            storage,
            jobs,
            warehouse,
            downloader: Downloader::from_config(&config),
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Register a new queued job and start it in the background.
    pub async fn submit(self: &Arc<Self>, source_ref: &str) -> Result<Uuid> {
        let job_id = Uuid::new_v4();
        self.jobs.create(job_id, source_ref).await?;
        spawn_import(Arc::clone(self), job_id, source_ref.to_string());
        Ok(job_id)
    }

    /// Process one queued job to a terminal state.
    ///
    /// Never returns an error: failures are persisted on the job record and
    /// reported through [`JobOutcome::Failed`].
    pub async fn run(&self, job_id: Uuid, source_ref: &str) -> JobOutcome {
        let span = info_span!("import_job", job_id = %job_id);
        self.run_job(job_id, source_ref).instrument(span).await
    }

    async fn run_job(&self, job_id: Uuid, source_ref: &str) -> JobOutcome {
        info!(source_ref, "import started");
        let mut resources = JobResources::default();
        let result = self.execute(job_id, source_ref, &mut resources).await;
        resources.release().await;

        match result {
            Ok((total_rows, table)) => {
                info!(total_rows, table = %table, "import completed");
                JobOutcome::Completed { total_rows, table }
            }
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, "import failed");
                if let Err(store_err) = self.jobs.fail(job_id, &message).await {
                    error!(error = %store_err, "recording job failure failed");
                }
                JobOutcome::Failed { message }
            }
        }
    }

    async fn execute(
        &self,
        job_id: Uuid,
        source_ref: &str,
        resources: &mut JobResources,
    ) -> Result<(u64, String)> {
        let mut status = JobStatus::Queued;

        self.transition(job_id, &mut status, JobStatus::DownloadingFile).await?;
        let scratch = self.downloader.download(self.storage.as_ref(), source_ref).await?;
        let scratch = resources.scratch.insert(scratch);

        let (format, stream) = self.open_source(scratch).await?;
        info!(format = ?format, source = stream.source_type(), "source opened");
        let feed = RowFeed::spawn(stream, self.config.row_channel_capacity);

        let SampledSource {
            headers,
            mut sample,
            inference,
            mut feed,
        } = self.read_header_and_sample(feed).await?;

        let batch_size = self.config.batch_size_for(headers.len());
        let columns = build_columns(&headers, &inference.resolve());
        let table = DestinationTable::new(&self.config.warehouse_schema, job_id, columns);
        info!(
            columns = table.columns.len(),
            sampled = inference.rows_seen(),
            batch_size,
            "schema inferred"
        );

        self.transition(job_id, &mut status, JobStatus::CreatingTable).await?;
        let warehouse = resources.warehouse.insert(self.warehouse.connect().await?);
        let mut materializer = TableMaterializer::new();
        materializer.materialize(&mut **warehouse, &table).await?;

        self.transition(job_id, &mut status, JobStatus::InsertingRows).await?;
        let mut loader = BatchLoader::new(
            job_id,
            table.clone(),
            Arc::clone(&self.jobs),
            batch_size,
            &self.config,
        );
        for row in sample.drain(..) {
            loader.push(&mut **warehouse, &row).await?;
        }
        drop(sample);

        while let Some(row) = feed.next_row().await {
            let row = row?;
            if is_blank_row(&row) {
                continue;
            }
            loader.push(&mut **warehouse, &row).await?;
        }
        let total_rows = loader.finish(&mut **warehouse).await?;

        self.jobs.complete(job_id, total_rows, &table.columns).await?;
        Ok((total_rows, table.qualified_name()))
    }

    async fn transition(&self, job_id: Uuid, current: &mut JobStatus, next: JobStatus) -> Result<()> {
        if !current.can_transition_to(next) {
            return Err(IngestError::JobStore(format!(
                "illegal transition {} -> {}",
                current, next
            )));
        }
        self.jobs.set_status(job_id, next).await?;
        debug!(from = %current, to = %next, "job status changed");
        *current = next;
        Ok(())
    }

    async fn open_source(&self, scratch: &NamedTempFile) -> Result<(FileFormat, Box<dyn RowStream>)> {
        let path = scratch.path().to_path_buf();
        let prefix_len = self.config.sniff_prefix_bytes;
        tokio::task::spawn_blocking(move || -> Result<(FileFormat, Box<dyn RowStream>)> {
            let format = sniff_file(&path, prefix_len)?;
            let stream = open_row_stream(&path, format)?;
            Ok((format, stream))
        })
        .await
        .map_err(|e| IngestError::Parse(format!("opening source failed: {}", e)))?
    }

    /// First non-empty row is the header; then up to `sample_size` non-empty
    /// data rows are buffered and observed.
    async fn read_header_and_sample(&self, mut feed: RowFeed) -> Result<SampledSource> {
        let header = loop {
            match feed.next_row().await {
                Some(row) => {
                    let row = row?;
                    if !is_blank_row(&row) {
                        break row;
                    }
                }
                None => return Err(IngestError::Schema("file contains no header row".to_string())),
            }
        };
        let headers = header_names(&header);

        let mut inference = SchemaInference::new(headers.len());
        let mut sample = Vec::with_capacity(self.config.sample_size.min(4096));
        while sample.len() < self.config.sample_size {
            let Some(row) = feed.next_row().await else {
                debug!(rows = sample.len(), "source exhausted within the sample");
                break;
            };
            let row = row?;
            if is_blank_row(&row) {
                continue;
            }
            inference.observe_row(&row);
            sample.push(row);
        }

        Ok(SampledSource {
            headers,
            sample,
            inference,
            feed,
        })
    }
}

/// Fire-and-forget entry point: the job runs on its own task.
pub fn spawn_import(orchestrator: Arc<ImportOrchestrator>, job_id: Uuid, source_ref: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = orchestrator.run(job_id, &source_ref).await;
        debug!(job_id = %job_id, outcome = ?outcome, "import task finished");
    })
}
