//! Delegated-mode reconciliation with the remote queue service.
//!
//! The remote service owns the queue while delegated mode is active. This
//! module polls it and replaces the local store wholesale; it is the only
//! place able to mint the [`SnapshotWriter`] that `replace_all` requires.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::QueueError;
use super::models::QueueSettings;
use super::store::QueueStore;
use crate::clients::{RemoteQueueApi, RemoteSettings};

/// Default interval between remote polls.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(2);

/// Capability to overwrite the store with remote state.
pub struct SnapshotWriter {
    _private: (),
}

impl SnapshotWriter {
    fn new() -> Self {
        Self { _private: () }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new()
    }
}

/// Fetches remote state and writes it into the store.
struct SyncPoller {
    store: Arc<QueueStore>,
    remote: Arc<dyn RemoteQueueApi>,
    writer: SnapshotWriter,
    /// Polls are applied in the order they were issued.
    poll_lock: tokio::sync::Mutex<()>,
}

impl SyncPoller {
    async fn poll_once(&self) -> bool {
        let _guard = self.poll_lock.lock().await;
        match self.remote.get_queue().await {
            Ok(state) => {
                let snapshot = state.into_snapshot(self.store.settings());
                debug!(
                    "Remote queue: {} queued, {} downloading, {} completed, {} failed",
                    snapshot.queued.len(),
                    snapshot.downloading.len(),
                    snapshot.completed.len(),
                    snapshot.failed.len()
                );
                self.store.replace_all(&self.writer, snapshot);
                true
            }
            Err(e) => {
                warn!("Remote queue poll failed, keeping previous state: {:#}", e);
                false
            }
        }
    }

    /// Pull the remote settings into the store. Failures keep local values.
    async fn pull_settings(&self) {
        match self.remote.get_settings().await {
            Ok(remote) => {
                let merged = remote.merge_into(self.store.settings());
                self.store.set_settings(merged);
            }
            Err(e) => warn!("Failed to fetch remote queue settings: {:#}", e),
        }
    }

    async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        info!(
            "Remote sync starting (interval={}ms)",
            interval.as_millis()
        );

        tokio::select! {
            _ = self.pull_settings() => {}
            _ = shutdown.cancelled() => {
                info!("Remote sync stopped");
                return;
            }
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.poll_once() => {}
                        _ = shutdown.cancelled() => break,
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Remote sync stopped");
    }
}

struct RunningSync {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the delegated-mode writer and its polling task.
pub struct RemoteSyncAdapter {
    poller: Arc<SyncPoller>,
    interval: Duration,
    running: Option<RunningSync>,
}

impl RemoteSyncAdapter {
    /// A zero `interval` falls back to [`DEFAULT_SYNC_INTERVAL`].
    pub fn new(store: Arc<QueueStore>, remote: Arc<dyn RemoteQueueApi>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            warn!(
                "Remote sync interval must be non-zero, using {}ms",
                DEFAULT_SYNC_INTERVAL.as_millis()
            );
            DEFAULT_SYNC_INTERVAL
        } else {
            interval
        };
        Self {
            poller: Arc::new(SyncPoller {
                store,
                remote,
                writer: SnapshotWriter::new(),
                poll_lock: tokio::sync::Mutex::new(()),
            }),
            interval,
            running: None,
        }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteQueueApi> {
        &self.poller.remote
    }

    /// False once stopped or if the polling task died.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Start polling. Returns false if already running.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        if let Some(dead) = self.running.take() {
            warn!("Remote sync task had ended, restarting");
            dead.shutdown.cancel();
        }

        let shutdown = CancellationToken::new();
        let poller = self.poller.clone();
        let interval = self.interval;
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { poller.run(interval, token).await });

        self.running = Some(RunningSync { shutdown, handle });
        true
    }

    /// Stop polling and wait for the task. No store writes happen after this
    /// returns.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.shutdown.cancel();
        if let Err(e) = running.handle.await {
            warn!("Remote sync task ended abnormally: {}", e);
        }
    }

    /// Fetch remote state once and apply it. Returns false if the fetch
    /// failed; the store is left untouched in that case.
    pub async fn poll_once(&self) -> bool {
        self.poller.poll_once().await
    }

    /// Push settings to the remote service and store what it acknowledged.
    pub async fn forward_settings(&self, settings: QueueSettings) -> Result<QueueSettings, QueueError> {
        let ack = self
            .poller
            .remote
            .update_settings(&RemoteSettings::from(&settings))
            .await?;
        let merged = ack.merge_into(settings);
        self.poller.store.set_settings(merged);
        Ok(merged)
    }

    pub async fn remove_item(&self, id: &str) -> Result<(), QueueError> {
        self.poller.remote.remove_item(id).await?;
        self.poll_once().await;
        Ok(())
    }

    pub async fn retry_all(&self) -> Result<(), QueueError> {
        self.poller.remote.retry_all().await?;
        self.poll_once().await;
        Ok(())
    }
}

impl Drop for RemoteSyncAdapter {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown.cancel();
        }
    }
}
