//! The queue facade handed to the presentation layer.
//!
//! `DownloadQueue` owns the store and exactly one execution mode at a time.
//! In local mode the scheduler writes to the store; in delegated mode only
//! the remote sync adapter does.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::delegated_transfer::DelegatedTransfer;
use super::error::QueueError;
use super::local_transfer::{LocalTransfer, DEFAULT_INTER_TRANSFER_DELAY};
use super::models::*;
use super::remote_sync::{RemoteSyncAdapter, DEFAULT_SYNC_INTERVAL};
use super::scheduler::{LocalScheduler, DEFAULT_IDLE_POLL_INTERVAL};
use super::store::{QueueStore, RetryOutcome, Subscription};
use super::transfer::TransferExecutor;
use crate::clients::{CatalogResolverClient, RemoteQueueApi, RemoteQueueClient};
use crate::config::AppConfig;

/// Timing knobs for the scheduler and the sync adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueTimings {
    /// Fallback wake-up for the dispatch loop.
    pub idle_poll_interval: Duration,
    /// Pause after each local transfer before its slot is reused.
    pub inter_transfer_delay: Duration,
    pub sync_interval: Duration,
}

impl Default for QueueTimings {
    fn default() -> Self {
        Self {
            idle_poll_interval: DEFAULT_IDLE_POLL_INTERVAL,
            inter_transfer_delay: DEFAULT_INTER_TRANSFER_DELAY,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// Collaborators for each mode. A mode without its collaborator cannot be
/// selected.
#[derive(Clone, Default)]
pub struct QueueComponents {
    pub local: Option<Arc<dyn TransferExecutor>>,
    pub remote: Option<Arc<dyn RemoteQueueApi>>,
}

struct DelegatedMode {
    sync: RemoteSyncAdapter,
    transfer: DelegatedTransfer,
}

/// The active writer of the store.
enum ExecutionMode {
    Local(LocalScheduler),
    Delegated(DelegatedMode),
}

impl ExecutionMode {
    fn mode(&self) -> QueueMode {
        match self {
            ExecutionMode::Local(_) => QueueMode::Local,
            ExecutionMode::Delegated(_) => QueueMode::Delegated,
        }
    }

    fn is_running(&self) -> bool {
        match self {
            ExecutionMode::Local(scheduler) => scheduler.is_running(),
            ExecutionMode::Delegated(delegated) => delegated.sync.is_running(),
        }
    }

    fn start(&mut self) -> Result<bool, QueueError> {
        match self {
            ExecutionMode::Local(scheduler) => scheduler.start(),
            ExecutionMode::Delegated(delegated) => Ok(delegated.sync.start()),
        }
    }

    async fn stop(&mut self) -> Result<(), QueueError> {
        match self {
            ExecutionMode::Local(scheduler) => scheduler.stop().await,
            ExecutionMode::Delegated(delegated) => {
                delegated.sync.stop().await;
                Ok(())
            }
        }
    }
}

/// Bounded-concurrency download queue.
pub struct DownloadQueue {
    store: Arc<QueueStore>,
    components: QueueComponents,
    timings: QueueTimings,
    mode: Mutex<ExecutionMode>,
}

impl DownloadQueue {
    /// Create a stopped queue in `settings.mode`.
    pub fn new(
        settings: QueueSettings,
        components: QueueComponents,
        timings: QueueTimings,
    ) -> Result<Self, QueueError> {
        if settings.max_concurrent == 0 {
            return Err(QueueError::InvalidSetting(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        let store = Arc::new(QueueStore::new(settings));
        let mode = Self::build_mode(&store, &components, &timings, settings.mode)?;

        Ok(Self {
            store,
            components,
            timings,
            mode: Mutex::new(mode),
        })
    }

    /// Build the HTTP clients described by `config` and create the queue.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let mut components = QueueComponents::default();

        if let Some(resolver_url) = &config.resolver_url {
            let resolver = CatalogResolverClient::new(resolver_url.clone(), config.request_timeout_sec)?;
            // Streams may run longer than any request timeout.
            let http = reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(config.request_timeout_sec))
                .build()
                .context("Failed to create HTTP client")?;
            let transfer = LocalTransfer::new(
                Arc::new(resolver),
                http,
                config.download_dir.clone(),
                config.timings.inter_transfer_delay,
            );
            components.local = Some(Arc::new(transfer));
        }

        if let Some(remote_url) = &config.remote_url {
            let remote = RemoteQueueClient::new(remote_url.clone(), config.request_timeout_sec)?;
            components.remote = Some(Arc::new(remote));
        }

        Self::new(config.settings, components, config.timings)
            .context("Failed to create download queue")
    }

    fn build_mode(
        store: &Arc<QueueStore>,
        components: &QueueComponents,
        timings: &QueueTimings,
        mode: QueueMode,
    ) -> Result<ExecutionMode, QueueError> {
        match mode {
            QueueMode::Local => {
                let executor = components
                    .local
                    .clone()
                    .ok_or(QueueError::ModeUnavailable { mode: mode.as_str() })?;
                Ok(ExecutionMode::Local(LocalScheduler::new(
                    store.clone(),
                    executor,
                    timings.idle_poll_interval,
                )))
            }
            QueueMode::Delegated => {
                let remote = components
                    .remote
                    .clone()
                    .ok_or(QueueError::ModeUnavailable { mode: mode.as_str() })?;
                Ok(ExecutionMode::Delegated(DelegatedMode {
                    sync: RemoteSyncAdapter::new(store.clone(), remote.clone(), timings.sync_interval),
                    transfer: DelegatedTransfer::new(remote),
                }))
            }
        }
    }

    // =========================================================================
    // Enqueue / Removal
    // =========================================================================

    /// Add validated tracks. In delegated mode they are submitted to the
    /// remote service and the counts are the ones it reports.
    pub async fn enqueue(&self, tracks: Vec<TrackDescriptor>) -> Result<EnqueueResult, QueueError> {
        let mode = self.mode.lock().await;
        let result = match &*mode {
            ExecutionMode::Local(_) => self.store.enqueue(tracks),
            ExecutionMode::Delegated(delegated) => {
                let result = delegated.transfer.submit_batch(&tracks).await?;
                delegated.sync.poll_once().await;
                result
            }
        };
        info!(
            "Enqueued {} tracks ({} duplicates)",
            result.added, result.duplicates
        );
        Ok(result)
    }

    /// Validate loosely-typed descriptors and enqueue the valid ones.
    /// Invalid entries are skipped and counted.
    pub async fn enqueue_raw(&self, raw: Vec<RawTrackDescriptor>) -> Result<EnqueueResult, QueueError> {
        let default_quality = self.store.settings().quality;
        let mut tracks = Vec::with_capacity(raw.len());
        let mut invalid = 0;

        for (index, descriptor) in raw.into_iter().enumerate() {
            match descriptor.validate(default_quality) {
                Ok(track) => tracks.push(track),
                Err(e) => {
                    warn!("Skipping track #{}: {}", index, e);
                    invalid += 1;
                }
            }
        }

        let mut result = self.enqueue(tracks).await?;
        result.invalid = invalid;
        Ok(result)
    }

    /// Remove a not-yet-started item. Returns false if no queued item has
    /// that id.
    pub async fn remove_from_queue(&self, id: &str) -> Result<bool, QueueError> {
        let mode = self.mode.lock().await;
        match &*mode {
            ExecutionMode::Local(_) => Ok(self.store.remove_from_queue(id)),
            ExecutionMode::Delegated(delegated) => {
                let queued = self
                    .store
                    .get(id)
                    .is_some_and(|item| item.status == QueueStatus::Queued);
                if !queued {
                    return Ok(false);
                }
                delegated.sync.remove_item(id).await?;
                Ok(true)
            }
        }
    }

    pub async fn clear_queue(&self) -> Result<usize, QueueError> {
        self.local_only("clear_queue", |store| store.clear_queue()).await
    }

    pub async fn clear_completed(&self) -> Result<usize, QueueError> {
        self.local_only("clear_completed", |store| store.clear_completed()).await
    }

    pub async fn clear_failed(&self) -> Result<usize, QueueError> {
        self.local_only("clear_failed", |store| store.clear_failed()).await
    }

    async fn local_only<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&QueueStore) -> R,
    ) -> Result<R, QueueError> {
        let mode = self.mode.lock().await;
        match &*mode {
            ExecutionMode::Local(_) => Ok(f(&self.store)),
            ExecutionMode::Delegated(_) => Err(QueueError::unsupported(operation, QueueMode::Delegated)),
        }
    }

    // =========================================================================
    // Retry Handling
    // =========================================================================

    /// Move a failed item back to the tail of the queue.
    pub async fn retry(&self, id: &str) -> Result<(), QueueError> {
        let mode = self.mode.lock().await;
        match &*mode {
            ExecutionMode::Local(_) => match self.store.retry(id) {
                RetryOutcome::Requeued => Ok(()),
                RetryOutcome::NotFound => Err(QueueError::NotFound(id.to_string())),
                RetryOutcome::AlreadyActive => {
                    let catalog_id = self
                        .store
                        .get(id)
                        .map(|item| item.track.catalog_id)
                        .unwrap_or_else(|| id.to_string());
                    Err(QueueError::AlreadyActive(catalog_id))
                }
            },
            ExecutionMode::Delegated(delegated) => {
                let item = self
                    .store
                    .get(id)
                    .filter(|item| item.status == QueueStatus::Failed)
                    .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
                delegated
                    .transfer
                    .submit_batch(std::slice::from_ref(&item.track))
                    .await?;
                delegated.sync.poll_once().await;
                Ok(())
            }
        }
    }

    /// Requeue every failed item. Returns how many were requeued; in
    /// delegated mode, how many were failed when the request was sent.
    pub async fn retry_all_failed(&self) -> Result<usize, QueueError> {
        let mode = self.mode.lock().await;
        match &*mode {
            ExecutionMode::Local(_) => Ok(self.store.retry_all_failed()),
            ExecutionMode::Delegated(delegated) => {
                let failed = self.store.stats().failed;
                delegated.sync.retry_all().await?;
                Ok(failed)
            }
        }
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn settings(&self) -> QueueSettings {
        self.store.settings()
    }

    pub async fn set_quality(&self, quality: AudioQuality) -> Result<(), QueueError> {
        let mode = self.mode.lock().await;
        match &*mode {
            ExecutionMode::Local(_) => self.store.set_quality(quality),
            ExecutionMode::Delegated(delegated) => {
                let settings = QueueSettings {
                    quality,
                    ..self.store.settings()
                };
                delegated.sync.forward_settings(settings).await?;
            }
        }
        Ok(())
    }

    /// Change the concurrency limit. Running transfers are never aborted
    /// when it is lowered.
    pub async fn set_max_concurrent(&self, max_concurrent: usize) -> Result<(), QueueError> {
        if max_concurrent == 0 {
            return Err(QueueError::InvalidSetting(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        let mode = self.mode.lock().await;
        match &*mode {
            ExecutionMode::Local(_) => {
                self.store.set_max_concurrent(max_concurrent);
            }
            ExecutionMode::Delegated(delegated) => {
                let settings = QueueSettings {
                    max_concurrent,
                    ..self.store.settings()
                };
                delegated.sync.forward_settings(settings).await?;
            }
        }
        Ok(())
    }

    /// Switch execution mode. The current mode is stopped first; the new one
    /// is started only if the queue was running.
    ///
    /// Switching to local drops the mirrored remote state. Switching to
    /// delegated replaces the store with one remote poll.
    pub async fn set_mode(&self, new_mode: QueueMode) -> Result<(), QueueError> {
        let mut mode = self.mode.lock().await;
        if mode.mode() == new_mode {
            return Ok(());
        }

        let mut next = Self::build_mode(&self.store, &self.components, &self.timings, new_mode)?;
        let was_running = mode.is_running();
        let stopped = mode.stop().await;
        if let Err(e) = &stopped {
            warn!("Previous mode stopped with error: {}", e);
        }

        info!("Switching queue mode {} -> {}", mode.mode().as_str(), new_mode.as_str());
        self.store.set_mode(new_mode);
        match &next {
            ExecutionMode::Local(_) => {
                let dropped = self.store.clear_all();
                if dropped > 0 {
                    info!("Dropped {} mirrored remote items", dropped);
                }
            }
            ExecutionMode::Delegated(delegated) => {
                delegated.sync.poll_once().await;
            }
        }

        if was_running {
            next.start()?;
        }
        *mode = next;
        stopped
    }

    pub async fn mode(&self) -> QueueMode {
        self.mode.lock().await.mode()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the active mode. Returns `Ok(false)` if it was already running.
    pub async fn start(&self) -> Result<bool, QueueError> {
        let mut mode = self.mode.lock().await;
        let started = mode.start()?;
        if started {
            info!("Download queue started in {} mode", mode.mode().as_str());
        }
        Ok(started)
    }

    /// Stop the active mode. In local mode, in-flight transfers end as
    /// failed with "cancelled". Idempotent.
    pub async fn stop(&self) -> Result<(), QueueError> {
        let mut mode = self.mode.lock().await;
        let was_running = mode.is_running();
        let result = mode.stop().await;
        if was_running {
            info!("Download queue stopped");
        }
        result
    }

    pub async fn is_running(&self) -> bool {
        self.mode.lock().await.is_running()
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Register a listener called synchronously after every state change.
    pub fn subscribe(
        &self,
        listener: impl Fn(&QueueSnapshot) + Send + Sync + 'static,
    ) -> Subscription {
        self.store.subscribe(listener)
    }

    pub fn get_stats(&self) -> QueueStats {
        self.store.stats()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.store.snapshot()
    }

    pub fn get(&self, id: &str) -> Option<QueueItem> {
        self.store.get(id)
    }

    pub fn store(&self) -> &Arc<QueueStore> {
        &self.store
    }
}
