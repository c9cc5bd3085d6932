//! Server-delegated transfer strategy.
//!
//! Hands items to the remote queue service. Success means the service
//! accepted the job; completion shows up later through remote sync.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::{QueueError, TransferError};
use super::models::{EnqueueResult, QueueItem, TrackDescriptor};
use super::transfer::{ProgressSink, TransferExecutor, TransferOutcome};
use crate::clients::RemoteQueueApi;

pub struct DelegatedTransfer {
    remote: Arc<dyn RemoteQueueApi>,
}

impl DelegatedTransfer {
    pub fn new(remote: Arc<dyn RemoteQueueApi>) -> Self {
        Self { remote }
    }

    /// Submit a batch in one request and report the remote counts.
    pub async fn submit_batch(&self, tracks: &[TrackDescriptor]) -> Result<EnqueueResult, QueueError> {
        if tracks.is_empty() {
            return Ok(EnqueueResult::default());
        }
        let response = self.remote.add_items(tracks).await?;
        info!(
            "Remote queue accepted {} tracks ({} duplicates)",
            response.added, response.duplicates
        );
        Ok(EnqueueResult {
            added: response.added,
            duplicates: response.duplicates,
            invalid: 0,
        })
    }
}

#[async_trait]
impl TransferExecutor for DelegatedTransfer {
    async fn execute(
        &self,
        item: &QueueItem,
        _progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let submit = self.remote.add_items(std::slice::from_ref(&item.track));
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TransferOutcome::Failed(TransferError::Cancelled),
            result = submit => result,
        };

        match result {
            Ok(_) => TransferOutcome::Submitted,
            Err(e) => {
                warn!("Failed to submit {} to remote queue: {:#}", item.catalog_id(), e);
                TransferOutcome::Failed(TransferError::Remote(e.to_string()))
            }
        }
    }
}
