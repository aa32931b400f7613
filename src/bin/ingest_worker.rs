//! Import worker CLI
//!
//! Runs spreadsheet and delimited-text imports against the configured job
//! store, object storage and warehouse.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sheet_ingest::config::{IngestConfig, ServiceConfig};
use sheet_ingest::db::{init_pool, JobStore, PgJobStore, PgWarehouseConnector};
use sheet_ingest::ingestion::{ImportOrchestrator, JobOutcome};
use sheet_ingest::storage::HttpObjectStorage;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ingest-worker")]
#[command(about = "Tabular file import worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the import_jobs table
    Migrate,

    /// Register a job for a stored object and run it to completion
    Submit {
        /// Object reference, e.g. uploads/tenant-1/sales.csv
        source_ref: String,
    },

    /// Run an already registered job
    Run {
        job_id: Uuid,
    },

    /// Print a job record as JSON
    Status {
        job_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let service = ServiceConfig::from_env().context("Failed to read service configuration")?;
    let pool = init_pool(&service.database_url)
        .await
        .context("Failed to connect to the job store")?;
    let jobs = Arc::new(PgJobStore::new(pool));

    match args.command {
        Command::Migrate => {
            jobs.ensure_table().await.context("Failed to create import_jobs")?;
            info!("import_jobs table ready");
        }
        Command::Submit { source_ref } => {
            let orchestrator = build_orchestrator(&service, jobs.clone())?;
            let job_id = Uuid::new_v4();
            jobs.create(job_id, &source_ref)
                .await
                .context("Failed to register job")?;
            println!("{}", job_id);
            report(orchestrator.run(job_id, &source_ref).await)?;
        }
        Command::Run { job_id } => {
            let job = jobs
                .get(job_id)
                .await
                .context("Failed to load job")?
                .with_context(|| format!("job {} not found", job_id))?;
            let orchestrator = build_orchestrator(&service, jobs.clone())?;
            report(orchestrator.run(job.id, &job.source_ref).await)?;
        }
        Command::Status { job_id } => {
            let job = jobs
                .get(job_id)
                .await
                .context("Failed to load job")?
                .with_context(|| format!("job {} not found", job_id))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
    }

    Ok(())
}

fn build_orchestrator(service: &ServiceConfig, jobs: Arc<PgJobStore>) -> Result<ImportOrchestrator> {
    let config = IngestConfig::from_env().context("Invalid ingestion settings")?;
    let storage = Arc::new(HttpObjectStorage::new(
        service.storage_url.clone(),
        service.storage_service_key.clone(),
    ));
    let warehouse = Arc::new(PgWarehouseConnector::new(service.warehouse_url.clone()));
    Ok(ImportOrchestrator::new(storage, jobs, warehouse, config))
}

fn report(outcome: JobOutcome) -> Result<()> {
    match outcome {
        JobOutcome::Completed { total_rows, table } => {
            info!(total_rows, table = %table, "done");
            Ok(())
        }
        JobOutcome::Failed { message } => {
            error!(error = %message, "import failed");
            anyhow::bail!("import failed: {}", message)
        }
    }
}
