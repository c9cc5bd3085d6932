//! HTTP client for the catalog stream resolver.
//!
//! Exchanges a catalog id and quality tier for a short-lived stream URL.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::download_queue::{AudioQuality, TransferError};

/// Resolves transient stream URLs for catalog tracks.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve_stream_url(
        &self,
        catalog_id: &str,
        quality: AudioQuality,
    ) -> Result<String, TransferError>;
}

#[derive(Debug, Deserialize)]
struct StreamUrlResponse {
    #[serde(rename = "streamUrl", alias = "stream_url", alias = "url")]
    stream_url: Option<String>,
}

/// Client for `GET /track/{id}/stream?quality=Q`.
pub struct CatalogResolverClient {
    client: reqwest::Client,
    base_url: String,
}

impl CatalogResolverClient {
    /// Create a new resolver client.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the catalog service (e.g., "http://localhost:8000/api")
    /// * `timeout_sec` - Request timeout in seconds
    pub fn new(base_url: String, timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;

        // Ensure base_url doesn't have trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn stream_endpoint(&self, catalog_id: &str) -> String {
        format!(
            "{}/track/{}/stream",
            self.base_url,
            urlencoding::encode(catalog_id)
        )
    }
}

#[async_trait]
impl StreamResolver for CatalogResolverClient {
    async fn resolve_stream_url(
        &self,
        catalog_id: &str,
        quality: AudioQuality,
    ) -> Result<String, TransferError> {
        let url = self.stream_endpoint(catalog_id);
        let response = self
            .client
            .get(&url)
            .query(&[("quality", quality.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransferError::Http(response.status().as_u16()));
        }

        let body: StreamUrlResponse = response
            .json()
            .await
            .map_err(|e| TransferError::Network(format!("Failed to parse stream response: {}", e)))?;

        let stream_url = body
            .stream_url
            .filter(|u| !u.is_empty())
            .ok_or(TransferError::StreamUrlMissing)?;

        debug!("Resolved stream URL for track {} ({})", catalog_id, quality.as_str());
        Ok(stream_url)
    }
}
