pub mod config;
pub mod db;
pub mod error;
pub mod ingestion;
pub mod storage;

pub use config::{IngestConfig, ServiceConfig};
pub use error::{IngestError, Result};
pub use ingestion::{spawn_import, ImportJob, ImportOrchestrator, JobOutcome, JobStatus};
