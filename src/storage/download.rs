//! Streaming download of a source object into a scratch file

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::storage::ObjectStorage;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Fetches objects into scratch files with bounded retry.
///
/// Every attempt asks storage for a fresh signed URL, so a URL that expired
/// between attempts is never reused.
pub struct Downloader {
    client: reqwest::Client,
    attempts: u32,
    retry_delay: Duration,
    timeout: Duration,
    url_ttl: Duration,
    scratch_dir: Option<PathBuf>,
}

impl Downloader {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            attempts: config.download_attempts.max(1),
            retry_delay: config.download_retry_delay,
            timeout: config.download_timeout,
            url_ttl: config.signed_url_ttl,
            scratch_dir: config.scratch_dir.clone(),
        }
    }

    /// Download `source_ref` to a scratch file that is deleted when dropped.
    pub async fn download(&self, storage: &dyn ObjectStorage, source_ref: &str) -> Result<NamedTempFile> {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            info!(attempt, attempts = self.attempts, "download attempt {} of {}", attempt, self.attempts);

            let result = match tokio::time::timeout(self.timeout, self.attempt(storage, source_ref)).await {
                Ok(result) => result,
                Err(_) => Err(IngestError::Download(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                ))),
            };

            match result {
                Ok(file) => return Ok(file),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "download attempt failed");
                    last_error = Some(e);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(IngestError::Download(format!(
            "giving up on {} after {} attempts: {}",
            source_ref,
            self.attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn attempt(&self, storage: &dyn ObjectStorage, source_ref: &str) -> Result<NamedTempFile> {
        let url = storage.signed_url(source_ref, self.url_ttl).await?;

        let mut response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Download(format!(
                "download failed with status {}",
                status
            )));
        }

        let scratch = match &self.scratch_dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        let mut file = tokio::fs::File::from_std(scratch.reopen()?);

        let mut bytes: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;

        info!(bytes, path = %scratch.path().display(), "download complete");
        Ok(scratch)
    }
}
