//! HTTP client for the remote queue service used in delegated mode.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::models::{
    RemoteAddRequest, RemoteAddResponse, RemoteQueueState, RemoteSettings, RemoteTrackRequest,
};
use crate::download_queue::TrackDescriptor;

/// Operations offered by the remote queue service.
#[async_trait]
pub trait RemoteQueueApi: Send + Sync {
    /// Submit tracks for download on the remote side.
    async fn add_items(&self, tracks: &[TrackDescriptor]) -> Result<RemoteAddResponse>;

    /// Fetch the authoritative queue state.
    async fn get_queue(&self) -> Result<RemoteQueueState>;

    /// Remove an item from the remote queue.
    async fn remove_item(&self, id: &str) -> Result<()>;

    /// Requeue every failed item on the remote side.
    async fn retry_all(&self) -> Result<()>;

    async fn get_settings(&self) -> Result<RemoteSettings>;

    /// Push settings; returns the values the service acknowledged.
    async fn update_settings(&self, settings: &RemoteSettings) -> Result<RemoteSettings>;
}

/// Client for the remote queue service.
pub struct RemoteQueueClient {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteQueueClient {
    /// Create a new remote queue client.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the queue service (e.g., "http://nas:8000/api")
    /// * `timeout_sec` - Request timeout in seconds
    pub fn new(base_url: String, timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn item_endpoint(&self, id: &str) -> String {
        format!("{}/queue/{}", self.base_url, urlencoding::encode(id))
    }
}

#[async_trait]
impl RemoteQueueApi for RemoteQueueClient {
    async fn add_items(&self, tracks: &[TrackDescriptor]) -> Result<RemoteAddResponse> {
        let url = format!("{}/queue/add", self.base_url);
        let body = RemoteAddRequest {
            items: tracks.iter().map(RemoteTrackRequest::from).collect(),
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to connect to remote queue")?;

        if !response.status().is_success() {
            anyhow::bail!("Queue add failed with status: {}", response.status());
        }

        response
            .json()
            .await
            .context("Failed to parse queue add response")
    }

    async fn get_queue(&self) -> Result<RemoteQueueState> {
        let url = format!("{}/queue", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to connect to remote queue")?;

        if !response.status().is_success() {
            anyhow::bail!("Queue fetch failed with status: {}", response.status());
        }

        response
            .json()
            .await
            .context("Failed to parse queue state")
    }

    async fn remove_item(&self, id: &str) -> Result<()> {
        let url = self.item_endpoint(id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to connect to remote queue")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Failed to remove queue item {}: status {}",
                id,
                response.status()
            );
        }
        Ok(())
    }

    async fn retry_all(&self) -> Result<()> {
        let url = format!("{}/queue/retry-all", self.base_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .context("Failed to connect to remote queue")?;

        if !response.status().is_success() {
            anyhow::bail!("Retry-all failed with status: {}", response.status());
        }
        Ok(())
    }

    async fn get_settings(&self) -> Result<RemoteSettings> {
        let url = format!("{}/queue/settings", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to connect to remote queue")?
            .error_for_status()?;

        response
            .json()
            .await
            .context("Failed to parse queue settings")
    }

    async fn update_settings(&self, settings: &RemoteSettings) -> Result<RemoteSettings> {
        let url = format!("{}/queue/settings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(settings)
            .send()
            .await
            .context("Failed to connect to remote queue")?
            .error_for_status()?;

        response
            .json()
            .await
            .context("Failed to parse acknowledged settings")
    }
}
