use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Fetching the source file failed (network, expired URL, non-2xx status).
    #[error("Download error: {0}")]
    Download(String),

    /// Resolving a stored object reference to a signed URL failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The source file is corrupt or structurally unreadable.
    #[error("Parse error: {0}")]
    Parse(String),

    /// No usable schema could be derived (e.g. missing header row).
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Job store error: {0}")]
    JobStore(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// Transient failures worth another attempt at the call site.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::Download(_) | IngestError::Storage(_) | IngestError::Warehouse(_)
        )
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Warehouse(err.to_string())
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        IngestError::Download(err.to_string())
    }
}

impl From<csv::Error> for IngestError {
    fn from(err: csv::Error) -> Self {
        IngestError::Parse(err.to_string())
    }
}

impl From<zip::result::ZipError> for IngestError {
    fn from(err: zip::result::ZipError) -> Self {
        IngestError::Parse(format!("spreadsheet container: {}", err))
    }
}

impl From<quick_xml::Error> for IngestError {
    fn from(err: quick_xml::Error) -> Self {
        IngestError::Parse(format!("spreadsheet xml: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
