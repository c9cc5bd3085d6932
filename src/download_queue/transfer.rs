//! Transfer executor contract shared by the local and delegated strategies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::error::TransferError;
use super::models::{QueueItem, TrackDescriptor};
use super::store::QueueStore;

/// Terminal result of one transfer. Exactly one per `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Bytes are on disk under `filename`.
    Completed { filename: String, bytes: u64 },
    /// The remote service accepted the job; completion is observed by polling.
    Submitted,
    Failed(TransferError),
}

/// Receives progress percentages while a transfer runs.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8);
}

/// Forwards progress of one item into the store.
pub struct StoreProgress {
    store: Arc<QueueStore>,
    item_id: String,
}

impl StoreProgress {
    pub fn new(store: Arc<QueueStore>, item_id: String) -> Self {
        Self { store, item_id }
    }
}

impl ProgressSink for StoreProgress {
    fn report(&self, percent: u8) {
        self.store.update_progress(&self.item_id, percent);
    }
}

/// Performs the work for one queue item.
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Run the transfer for `item` at its requested quality.
    ///
    /// Implementations must return `Failed(TransferError::Cancelled)` promptly
    /// once `cancel` fires.
    async fn execute(
        &self,
        item: &QueueItem,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> TransferOutcome;

    /// Minimum pause after each transfer before its slot is reused.
    fn cooldown(&self) -> Duration {
        Duration::ZERO
    }
}

lazy_static! {
    static ref ILLEGAL_FILENAME_CHARS: Regex =
        Regex::new(r#"[<>:"/\\|?*]"#).expect("valid regex");
}

/// Replace characters that are illegal in file names with `_`.
pub fn sanitize_filename(name: &str) -> String {
    ILLEGAL_FILENAME_CHARS.replace_all(name, "_").into_owned()
}

/// `{artist} - {title}.{ext}` with illegal characters replaced.
pub fn output_filename(track: &TrackDescriptor) -> String {
    sanitize_filename(&format!(
        "{} - {}.{}",
        track.artist,
        track.title,
        track.quality.file_extension()
    ))
}

/// Percentage of `received` over `total`, capped at 100.
pub fn percent_of(received: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((received.saturating_mul(100)) / total).min(100) as u8
}
