//! Object storage access: signed URL resolution and scratch-file downloads

pub mod download;

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::time::Duration;

pub use download::Downloader;

/// Resolves a stored object reference to a short-lived download URL.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// `source_ref` is `bucket/path/to/object`.
    async fn signed_url(&self, source_ref: &str, ttl: Duration) -> Result<String>;
}

/// Storage service reached over HTTP with a service key.
pub struct HttpObjectStorage {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl HttpObjectStorage {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
        }
    }

    fn absolute(&self, signed: &str) -> String {
        if signed.starts_with("http://") || signed.starts_with("https://") {
            signed.to_string()
        } else {
            format!("{}/{}", self.base_url, signed.trim_start_matches('/'))
        }
    }
}

/// Split `bucket/path` at the first slash.
pub fn split_source_ref(source_ref: &str) -> Result<(&str, &str)> {
    match source_ref.trim_start_matches('/').split_once('/') {
        Some((bucket, path)) if !bucket.is_empty() && !path.is_empty() => Ok((bucket, path)),
        _ => Err(IngestError::Storage(format!(
            "source reference '{}' is not of the form bucket/path",
            source_ref
        ))),
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn signed_url(&self, source_ref: &str, ttl: Duration) -> Result<String> {
        let (bucket, path) = split_source_ref(source_ref)?;
        let body = serde_json::json!({ "expiresIn": ttl.as_secs() });

        let response = self
            .client
            .post(&format!("{}/object/sign/{}/{}", self.base_url, bucket, path))
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("apikey", &self.service_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| IngestError::Storage(format!("Signing request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Storage(format!(
                "Signing {} failed with status {}",
                source_ref, status
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| IngestError::Storage(format!("Failed to parse signing response: {}", e)))?;

        let signed = response_json["signedURL"]
            .as_str()
            .or_else(|| response_json["signedUrl"].as_str())
            .ok_or_else(|| IngestError::Storage("No signedURL in signing response".to_string()))?;

        Ok(self.absolute(signed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_source_ref() {
        assert_eq!(
            split_source_ref("uploads/tenant-1/sales.csv").unwrap(),
            ("uploads", "tenant-1/sales.csv")
        );
        assert!(split_source_ref("no-path").is_err());
        assert!(split_source_ref("bucket/").is_err());
    }

    #[test]
    fn test_relative_signed_urls_resolve_against_base() {
        let storage = HttpObjectStorage::new("https://files.example.com/storage/v1/", "key");
        assert_eq!(
            storage.absolute("/object/sign/uploads/a.csv?token=x"),
            "https://files.example.com/storage/v1/object/sign/uploads/a.csv?token=x"
        );
        assert_eq!(storage.absolute("https://cdn.example.com/a"), "https://cdn.example.com/a");
    }
}
