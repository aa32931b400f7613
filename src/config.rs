//! Ingestion configuration
//!
//! Every tunable of the pipeline lives in [`IngestConfig`], which is built once
//! and handed to the orchestrator. Tests override individual fields with struct
//! update syntax.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Immutable pipeline settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Data rows (after the header) used for type inference.
    pub sample_size: usize,

    /// Upper bound on rows per INSERT statement.
    pub default_batch_size: usize,

    /// Bound values a single INSERT may carry. Kept below the driver's hard limit.
    pub parameter_ceiling: usize,

    /// Source rows between best-effort progress writes.
    pub progress_interval: u64,

    pub download_attempts: u32,
    pub download_retry_delay: Duration,
    pub download_timeout: Duration,

    /// Attempts per batch insert (first try plus retries).
    pub insert_attempts: u32,

    pub sniff_prefix_bytes: usize,
    pub signed_url_ttl: Duration,

    /// Rows buffered between the blocking parser and the async loader.
    pub row_channel_capacity: usize,

    /// Warehouse schema that receives destination tables.
    pub warehouse_schema: String,

    /// Directory for downloaded scratch files. System temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sample_size: 1000,
            default_batch_size: 2000,
            parameter_ceiling: 60_000,
            progress_interval: 2000,
            download_attempts: 3,
            download_retry_delay: Duration::from_secs(2),
            download_timeout: Duration::from_secs(300),
            insert_attempts: 2,
            sniff_prefix_bytes: 4096,
            signed_url_ttl: Duration::from_secs(3600),
            row_channel_capacity: 1024,
            warehouse_schema: "public".to_string(),
            scratch_dir: None,
        }
    }
}

impl IngestConfig {
    /// Defaults overlaid with `INGEST_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = parse_var("INGEST_SAMPLE_SIZE")? {
            config.sample_size = v;
        }
        if let Some(v) = parse_var("INGEST_BATCH_SIZE")? {
            config.default_batch_size = v;
        }
        if let Some(v) = parse_var("INGEST_PARAMETER_CEILING")? {
            config.parameter_ceiling = v;
        }
        if let Some(v) = parse_var("INGEST_PROGRESS_INTERVAL")? {
            config.progress_interval = v;
        }
        if let Some(v) = parse_var("INGEST_DOWNLOAD_ATTEMPTS")? {
            config.download_attempts = v;
        }
        if let Some(ms) = parse_var::<u64>("INGEST_DOWNLOAD_RETRY_DELAY_MS")? {
            config.download_retry_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>("INGEST_DOWNLOAD_TIMEOUT_SECS")? {
            config.download_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = parse_var("INGEST_INSERT_ATTEMPTS")? {
            config.insert_attempts = v;
        }
        if let Ok(schema) = env::var("INGEST_WAREHOUSE_SCHEMA") {
            config.warehouse_schema = schema;
        }
        if let Ok(dir) = env::var("INGEST_SCRATCH_DIR") {
            config.scratch_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_size == 0 {
            return Err(IngestError::Config("sample_size must be positive".to_string()));
        }
        if self.default_batch_size == 0 || self.parameter_ceiling == 0 {
            return Err(IngestError::Config(
                "batch size and parameter ceiling must be positive".to_string(),
            ));
        }
        if self.download_attempts == 0 || self.insert_attempts == 0 {
            return Err(IngestError::Config("attempt counts must be at least 1".to_string()));
        }
        if self.progress_interval == 0 {
            return Err(IngestError::Config("progress_interval must be positive".to_string()));
        }
        if !is_plain_identifier(&self.warehouse_schema) {
            return Err(IngestError::Config(format!(
                "warehouse schema '{}' is not a plain identifier",
                self.warehouse_schema
            )));
        }
        Ok(())
    }

    /// Rows per INSERT for a table of `column_count` columns.
    ///
    /// Always at least one row; a single row wider than the ceiling is the
    /// warehouse's problem.
    pub fn batch_size_for(&self, column_count: usize) -> usize {
        let by_params = self.parameter_ceiling / column_count.max(1);
        self.default_batch_size.min(by_params).max(1)
    }
}

/// Connection settings for the worker binary.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub warehouse_url: String,
    pub storage_url: String,
    pub storage_service_key: String,
}

impl ServiceConfig {
    /// Reads `DATABASE_URL`, `WAREHOUSE_URL`, `STORAGE_URL` and `STORAGE_SERVICE_KEY`.
    pub fn from_env() -> Result<Self> {
        let database_url = required_var("DATABASE_URL")?;
        let warehouse_url = env::var("WAREHOUSE_URL").unwrap_or_else(|_| database_url.clone());
        Ok(Self {
            database_url,
            warehouse_url,
            storage_url: required_var("STORAGE_URL")?,
            storage_service_key: required_var("STORAGE_SERVICE_KEY")?,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    env::var(name).map_err(|_| IngestError::Config(format!("{} not set", name)))
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| IngestError::Config(format!("{}='{}' is not a valid value", name, raw))),
        Err(_) => Ok(None),
    }
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_scenarios() {
        let config = IngestConfig::default();
        assert_eq!(config.batch_size_for(40), 1500);
        assert_eq!(config.batch_size_for(4), 2000);
        assert_eq!(config.batch_size_for(30), 2000);
        assert_eq!(config.batch_size_for(31), 1935);
        assert_eq!(config.batch_size_for(0), 2000);
    }

    #[test]
    fn test_batch_size_respects_ceiling() {
        let config = IngestConfig::default();
        for columns in 1..=500 {
            let batch = config.batch_size_for(columns);
            assert!(batch <= config.default_batch_size);
            assert!(batch * columns <= config.parameter_ceiling, "columns={}", columns);
        }
    }

    #[test]
    fn test_validate_rejects_bad_schema() {
        let config = IngestConfig {
            warehouse_schema: "public; drop".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(IngestError::Config(_))));
        assert!(IngestConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = IngestConfig {
            download_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
