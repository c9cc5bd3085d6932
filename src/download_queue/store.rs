//! Authoritative in-memory queue state.
//!
//! Holds the four status collections and the settings behind one mutex so
//! every mutator is atomic with respect to the others. Observers are notified
//! synchronously, in mutation order, after each change.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::Notify;
use tracing::debug;

use super::models::*;
use super::remote_sync::SnapshotWriter;

/// Callback invoked after every mutation with the resulting state.
///
/// Listeners may read the store but must not mutate it from inside the
/// callback.
pub type QueueListener = dyn Fn(&QueueSnapshot) + Send + Sync;

/// Outcome of [`QueueStore::retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Requeued,
    NotFound,
    /// Another item for the same track is queued, downloading or completed.
    AlreadyActive,
}

#[derive(Default)]
struct Collections {
    queued: VecDeque<QueueItem>,
    downloading: Vec<QueueItem>,
    completed: Vec<QueueItem>,
    failed: Vec<QueueItem>,
    settings: QueueSettings,
}

impl Collections {
    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            queued: self.queued.iter().cloned().collect(),
            downloading: self.downloading.clone(),
            completed: self.completed.clone(),
            failed: self.failed.clone(),
            settings: self.settings,
        }
    }

    fn stats(&self) -> QueueStats {
        let queued = self.queued.len();
        let downloading = self.downloading.len();
        let completed = self.completed.len();
        let failed = self.failed.len();
        QueueStats {
            queued,
            downloading,
            completed,
            failed,
            total: queued + downloading + completed + failed,
        }
    }

    /// Catalog ids that block a new enqueue.
    fn active_catalog_ids(&self) -> HashSet<String> {
        self.queued
            .iter()
            .chain(&self.downloading)
            .chain(&self.completed)
            .map(|item| item.track.catalog_id.clone())
            .collect()
    }

    fn is_active(&self, catalog_id: &str) -> bool {
        self.queued
            .iter()
            .chain(&self.downloading)
            .chain(&self.completed)
            .any(|item| item.track.catalog_id == catalog_id)
    }

    fn has_capacity(&self) -> bool {
        self.downloading.len() < self.settings.max_concurrent
    }

    fn take_downloading(&mut self, id: &str) -> Option<QueueItem> {
        let pos = self.downloading.iter().position(|item| item.id == id)?;
        Some(self.downloading.remove(pos))
    }
}

struct ListenerEntry {
    id: u64,
    listener: Arc<QueueListener>,
}

/// Observable container for queue state. Share it as `Arc<QueueStore>`.
pub struct QueueStore {
    state: Mutex<Collections>,
    listeners: Mutex<Vec<ListenerEntry>>,
    /// Held while delivering notifications so listeners see mutations in order.
    delivery: Mutex<()>,
    next_listener_id: AtomicU64,
    next_item_seq: AtomicU64,
    /// Wakes the dispatch loop after any mutation.
    changed: Notify,
}

impl QueueStore {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            state: Mutex::new(Collections {
                settings,
                ..Default::default()
            }),
            listeners: Mutex::new(Vec::new()),
            delivery: Mutex::new(()),
            next_listener_id: AtomicU64::new(1),
            next_item_seq: AtomicU64::new(0),
            changed: Notify::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, Collections> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the state lock. If it reports a change, wake the
    /// dispatch loop and notify listeners with the post-mutation snapshot.
    fn mutate<R>(&self, f: impl FnOnce(&mut Collections) -> (R, bool)) -> R {
        let _delivery = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        let (result, snapshot) = {
            let mut state = self.lock_state();
            let (result, changed) = f(&mut state);
            (result, changed.then(|| state.snapshot()))
        };

        if let Some(snapshot) = snapshot {
            self.changed.notify_one();
            let listeners: Vec<Arc<QueueListener>> = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|entry| entry.listener.clone())
                .collect();
            for listener in listeners {
                listener(&snapshot);
            }
        }

        result
    }

    fn next_item_id(&self, catalog_id: &str, added_at: i64) -> String {
        let seq = self.next_item_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", catalog_id, added_at, seq)
    }

    // =========================================================================
    // Enqueue / Removal
    // =========================================================================

    /// Append new tracks to `queued`, skipping any whose catalog id is already
    /// queued, downloading or completed (including earlier entries of the
    /// same batch). Input order is preserved.
    pub fn enqueue(&self, tracks: Vec<TrackDescriptor>) -> EnqueueResult {
        let now = chrono::Utc::now().timestamp_millis();
        self.mutate(|state| {
            let mut seen = state.active_catalog_ids();
            let mut result = EnqueueResult::default();

            for track in tracks {
                if !seen.insert(track.catalog_id.clone()) {
                    debug!("Skipping duplicate track {}", track.catalog_id);
                    result.duplicates += 1;
                    continue;
                }
                let id = self.next_item_id(&track.catalog_id, now);
                state.queued.push_back(QueueItem::new(id, track, now));
                result.added += 1;
            }

            (result, result.added > 0)
        })
    }

    /// Remove a not-yet-started item from `queued`.
    pub fn remove_from_queue(&self, id: &str) -> bool {
        self.mutate(|state| {
            let removed = match state.queued.iter().position(|item| item.id == id) {
                Some(pos) => state.queued.remove(pos).is_some(),
                None => false,
            };
            (removed, removed)
        })
    }

    /// Drop every queued item. Returns how many were removed.
    pub fn clear_queue(&self) -> usize {
        self.mutate(|state| {
            let count = state.queued.len();
            state.queued.clear();
            (count, count > 0)
        })
    }

    pub fn clear_completed(&self) -> usize {
        self.mutate(|state| {
            let count = state.completed.len();
            state.completed.clear();
            (count, count > 0)
        })
    }

    pub fn clear_failed(&self) -> usize {
        self.mutate(|state| {
            let count = state.failed.len();
            state.failed.clear();
            (count, count > 0)
        })
    }

    /// Drop all four collections, keeping settings.
    pub(crate) fn clear_all(&self) -> usize {
        self.mutate(|state| {
            let count = state.stats().total;
            state.queued.clear();
            state.downloading.clear();
            state.completed.clear();
            state.failed.clear();
            (count, count > 0)
        })
    }

    // =========================================================================
    // State Transitions (atomic)
    // =========================================================================

    /// Atomically move the head of `queued` to `downloading`.
    ///
    /// Returns `None` when the queue is empty or `downloading` is already at
    /// `max_concurrent`.
    pub fn dispatch_next(&self) -> Option<QueueItem> {
        let now = chrono::Utc::now().timestamp_millis();
        self.mutate(|state| {
            if !state.has_capacity() {
                return (None, false);
            }
            let Some(mut item) = state.queued.pop_front() else {
                return (None, false);
            };
            item.status = QueueStatus::Downloading;
            item.progress = 0;
            item.started_at = Some(now);
            state.downloading.push(item.clone());
            (Some(item), true)
        })
    }

    /// Move a specific queued item to `downloading`, if capacity allows.
    pub fn mark_downloading(&self, id: &str) -> bool {
        let now = chrono::Utc::now().timestamp_millis();
        self.mutate(|state| {
            if !state.has_capacity() {
                return (false, false);
            }
            let Some(pos) = state.queued.iter().position(|item| item.id == id) else {
                return (false, false);
            };
            let Some(mut item) = state.queued.remove(pos) else {
                return (false, false);
            };
            item.status = QueueStatus::Downloading;
            item.progress = 0;
            item.started_at = Some(now);
            state.downloading.push(item);
            (true, true)
        })
    }

    /// Record transfer progress. Values are clamped to 100 and never move
    /// backwards. Returns false if the item is not downloading.
    pub fn update_progress(&self, id: &str, percent: u8) -> bool {
        let percent = percent.min(100);
        self.mutate(|state| {
            let Some(item) = state.downloading.iter_mut().find(|item| item.id == id) else {
                return (false, false);
            };
            if percent > item.progress {
                item.progress = percent;
                (true, true)
            } else {
                (true, false)
            }
        })
    }

    /// Move a downloading item to `completed`.
    pub fn mark_completed(&self, id: &str, filename: Option<String>) -> bool {
        let now = chrono::Utc::now().timestamp_millis();
        self.mutate(|state| {
            let Some(mut item) = state.take_downloading(id) else {
                return (false, false);
            };
            item.status = QueueStatus::Completed;
            item.progress = 100;
            item.completed_at = Some(now);
            item.filename = filename;
            state.completed.push(item);
            (true, true)
        })
    }

    /// Move a downloading item to `failed` with the given reason.
    pub fn mark_failed(&self, id: &str, reason: &str) -> bool {
        let now = chrono::Utc::now().timestamp_millis();
        self.mutate(|state| {
            let Some(mut item) = state.take_downloading(id) else {
                return (false, false);
            };
            item.status = QueueStatus::Failed;
            item.error = Some(reason.to_string());
            item.failed_at = Some(now);
            state.failed.push(item);
            (true, true)
        })
    }

    /// Fail everything still marked downloading. Used when the dispatch loop
    /// dies and can no longer account for its transfers.
    pub(crate) fn fail_in_flight(&self, reason: &str) -> usize {
        let now = chrono::Utc::now().timestamp_millis();
        self.mutate(|state| {
            let stranded: Vec<QueueItem> = state.downloading.drain(..).collect();
            let count = stranded.len();
            for mut item in stranded {
                item.status = QueueStatus::Failed;
                item.error = Some(reason.to_string());
                item.failed_at = Some(now);
                state.failed.push(item);
            }
            (count, count > 0)
        })
    }

    // =========================================================================
    // Retry Handling
    // =========================================================================

    /// Move one failed item to the tail of `queued`, clearing error and
    /// progress. The track itself is unchanged.
    pub fn retry(&self, id: &str) -> RetryOutcome {
        self.mutate(|state| {
            let Some(pos) = state.failed.iter().position(|item| item.id == id) else {
                return (RetryOutcome::NotFound, false);
            };
            if state.is_active(&state.failed[pos].track.catalog_id) {
                return (RetryOutcome::AlreadyActive, false);
            }
            let mut item = state.failed.remove(pos);
            item.reset_for_retry();
            state.queued.push_back(item);
            (RetryOutcome::Requeued, true)
        })
    }

    /// Requeue every failed item whose track is not already active.
    /// Returns how many were requeued.
    pub fn retry_all_failed(&self) -> usize {
        self.mutate(|state| {
            let mut active = state.active_catalog_ids();
            let failed = std::mem::take(&mut state.failed);
            let mut requeued = 0;

            for mut item in failed {
                if active.insert(item.track.catalog_id.clone()) {
                    item.reset_for_retry();
                    state.queued.push_back(item);
                    requeued += 1;
                } else {
                    state.failed.push(item);
                }
            }

            (requeued, requeued > 0)
        })
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn settings(&self) -> QueueSettings {
        self.lock_state().settings
    }

    pub fn set_settings(&self, settings: QueueSettings) {
        self.mutate(|state| {
            let changed = state.settings != settings;
            state.settings = settings;
            ((), changed)
        })
    }

    pub fn set_quality(&self, quality: AudioQuality) {
        self.mutate(|state| {
            let changed = state.settings.quality != quality;
            state.settings.quality = quality;
            ((), changed)
        })
    }

    /// Takes effect at the next capacity check; running transfers are never
    /// aborted. Zero is ignored.
    pub fn set_max_concurrent(&self, max_concurrent: usize) -> bool {
        if max_concurrent == 0 {
            return false;
        }
        self.mutate(|state| {
            let changed = state.settings.max_concurrent != max_concurrent;
            state.settings.max_concurrent = max_concurrent;
            (true, changed)
        })
    }

    pub(crate) fn set_mode(&self, mode: QueueMode) {
        self.mutate(|state| {
            let changed = state.settings.mode != mode;
            state.settings.mode = mode;
            ((), changed)
        })
    }

    // =========================================================================
    // Remote Reconciliation
    // =========================================================================

    /// Replace all four collections with a remote snapshot. Only the remote
    /// sync adapter can provide the writer token.
    pub fn replace_all(&self, _writer: &SnapshotWriter, snapshot: QueueSnapshot) {
        self.mutate(|state| {
            let replacement = Collections {
                queued: snapshot.queued.into(),
                downloading: snapshot.downloading,
                completed: snapshot.completed,
                failed: snapshot.failed,
                settings: snapshot.settings,
            };
            let changed = replacement.snapshot() != state.snapshot();
            *state = replacement;
            ((), changed)
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn snapshot(&self) -> QueueSnapshot {
        self.lock_state().snapshot()
    }

    pub fn stats(&self) -> QueueStats {
        self.lock_state().stats()
    }

    pub fn get(&self, id: &str) -> Option<QueueItem> {
        let state = self.lock_state();
        state
            .queued
            .iter()
            .chain(&state.downloading)
            .chain(&state.completed)
            .chain(&state.failed)
            .find(|item| item.id == id)
            .cloned()
    }

    /// Wait until the next mutation. A mutation that happened since the last
    /// call completes this immediately.
    pub(crate) async fn changed(&self) {
        self.changed.notified().await;
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Register a listener called synchronously after every mutation.
    /// The listener is removed when the returned subscription is dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&QueueSnapshot) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ListenerEntry {
                id,
                listener: Arc::new(listener),
            });
        Subscription {
            store: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|entry| entry.id != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Handle returned by [`QueueStore::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    store: Weak<QueueStore>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id);
        }
    }
}
