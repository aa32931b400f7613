//! Import job record and its status machine

use crate::error::IngestError;
use crate::ingestion::schema_inference::ColumnMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of one import.
///
/// `Queued -> DownloadingFile -> CreatingTable -> InsertingRows -> Completed`,
/// and `Failed` from any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    DownloadingFile,
    CreatingTable,
    InsertingRows,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::DownloadingFile => "downloading_file",
            JobStatus::CreatingTable => "creating_table",
            JobStatus::InsertingRows => "inserting_rows",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the orchestrator may move a job from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, DownloadingFile)
            | (DownloadingFile, CreatingTable)
            | (CreatingTable, InsertingRows)
            | (InsertingRows, Completed) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "downloading_file" => Ok(JobStatus::DownloadingFile),
            "creating_table" => Ok(JobStatus::CreatingTable),
            "inserting_rows" => Ok(JobStatus::InsertingRows),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(IngestError::JobStore(format!("unknown job status '{}'", other))),
        }
    }
}

/// Persisted job record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub source_ref: String,
    pub status: JobStatus,
    pub total_rows: u64,
    /// Populated on completion.
    pub columns: Vec<ColumnMetadata>,
    pub error_message: Option<String>,
}

impl ImportJob {
    pub fn queued(id: Uuid, source_ref: impl Into<String>) -> Self {
        Self {
            id,
            source_ref: source_ref.into(),
            status: JobStatus::Queued,
            total_rows: 0,
            columns: Vec::new(),
            error_message: None,
        }
    }
}

/// What a finished run reports back to an awaiting caller.
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome {
    Completed { total_rows: u64, table: String },
    Failed { message: String },
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}
