//! Local worker scheduler.
//!
//! Keeps up to `max_concurrent` transfers running, drawn FIFO from the
//! store. The loop sleeps until a store mutation, a finished task or stop
//! wakes it, with an idle interval as fallback.
//!
//! A slot stays occupied for the executor's cooldown after its transfer
//! finishes, so the number of slots in use can exceed the number of items
//! marked downloading.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{QueueError, TransferError};
use super::models::QueueItem;
use super::store::QueueStore;
use super::transfer::{StoreProgress, TransferExecutor, TransferOutcome};

/// Fallback wake-up interval when no signal arrives.
pub const DEFAULT_IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Dispatcher {
    store: Arc<QueueStore>,
    executor: Arc<dyn TransferExecutor>,
    idle_poll_interval: Duration,
}

impl Dispatcher {
    async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Scheduler starting (max_concurrent={}, idle_poll={}ms)",
            self.store.settings().max_concurrent,
            self.idle_poll_interval.as_millis()
        );

        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            self.fill_slots(&mut tasks, &shutdown);

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Transfer task ended abnormally: {}", e);
                    }
                }
                _ = self.store.changed() => {}
                _ = tokio::time::sleep(self.idle_poll_interval) => {}
            }
        }

        if !tasks.is_empty() {
            info!("Scheduler stopping, cancelling {} transfers", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Transfer task ended abnormally: {}", e);
            }
        }

        info!("Scheduler stopped");
    }

    /// Dispatch queued items while both the slot count and the store allow.
    fn fill_slots(&self, tasks: &mut JoinSet<()>, shutdown: &CancellationToken) {
        while tasks.len() < self.store.settings().max_concurrent {
            let Some(item) = self.store.dispatch_next() else {
                break;
            };
            debug!("Dispatching {} ({})", item.id, item.track.title);
            tasks.spawn(run_transfer(
                self.store.clone(),
                self.executor.clone(),
                item,
                shutdown.child_token(),
            ));
        }
    }
}

/// Execute one item and record its outcome, then hold the slot for the
/// executor's cooldown.
async fn run_transfer(
    store: Arc<QueueStore>,
    executor: Arc<dyn TransferExecutor>,
    item: QueueItem,
    cancel: CancellationToken,
) {
    let progress = StoreProgress::new(store.clone(), item.id.clone());
    let outcome = AssertUnwindSafe(executor.execute(&item, &progress, &cancel))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            error!(
                "Transfer of {} panicked: {}",
                item.id,
                panic_message(payload.as_ref())
            );
            TransferOutcome::Failed(TransferError::Panicked)
        });

    let recorded = match outcome {
        TransferOutcome::Completed { filename, bytes } => {
            debug!("Completed {} -> {} ({} bytes)", item.id, filename, bytes);
            store.mark_completed(&item.id, Some(filename))
        }
        TransferOutcome::Submitted => {
            debug!("Submitted {} to remote queue", item.id);
            store.mark_completed(&item.id, None)
        }
        TransferOutcome::Failed(e) => {
            if e.is_cancelled() {
                info!("Transfer of {} cancelled", item.id);
            } else {
                warn!("Transfer of {} failed: {}", item.id, e);
            }
            store.mark_failed(&item.id, &e.to_string())
        }
    };
    if !recorded {
        debug!("Item {} left downloading before its outcome was recorded", item.id);
    }

    let cooldown = executor.cooldown();
    if !cooldown.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(cooldown) => {}
            _ = cancel.cancelled() => {}
        }
    }
}

struct RunningLoop {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives local transfers over the store.
pub struct LocalScheduler {
    dispatcher: Arc<Dispatcher>,
    running: Option<RunningLoop>,
    /// Set when the dispatch loop died unexpectedly.
    fault: Arc<Mutex<Option<String>>>,
}

impl LocalScheduler {
    /// A zero `idle_poll_interval` falls back to [`DEFAULT_IDLE_POLL_INTERVAL`].
    pub fn new(
        store: Arc<QueueStore>,
        executor: Arc<dyn TransferExecutor>,
        idle_poll_interval: Duration,
    ) -> Self {
        let idle_poll_interval = if idle_poll_interval.is_zero() {
            warn!(
                "Idle poll interval must be non-zero, using {}ms",
                DEFAULT_IDLE_POLL_INTERVAL.as_millis()
            );
            DEFAULT_IDLE_POLL_INTERVAL
        } else {
            idle_poll_interval
        };
        Self {
            dispatcher: Arc::new(Dispatcher {
                store,
                executor,
                idle_poll_interval,
            }),
            running: None,
            fault: Arc::new(Mutex::new(None)),
        }
    }

    fn take_fault(&self) -> Option<String> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Start the dispatch loop. Returns `Ok(false)` if it is already running.
    ///
    /// If the previous loop died with a fault, that fault is returned once
    /// and the scheduler stays stopped; the next call starts it again.
    pub fn start(&mut self) -> Result<bool, QueueError> {
        if self.is_running() {
            return Ok(false);
        }
        self.running = None;
        if let Some(fault) = self.take_fault() {
            return Err(QueueError::SchedulerFault(fault));
        }

        let shutdown = CancellationToken::new();
        let dispatcher = self.dispatcher.clone();
        let fault = self.fault.clone();
        let token = shutdown.clone();

        let handle = tokio::spawn(async move {
            let result = AssertUnwindSafe(dispatcher.run(token)).catch_unwind().await;
            if let Err(payload) = result {
                let message = panic_message(payload.as_ref());
                error!("Scheduler loop panicked: {}", message);
                let stranded = dispatcher
                    .store
                    .fail_in_flight(&format!("scheduler fault: {}", message));
                if stranded > 0 {
                    warn!("Marked {} in-flight transfers as failed", stranded);
                }
                *fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(message);
            }
        });

        self.running = Some(RunningLoop { shutdown, handle });
        Ok(true)
    }

    /// Cancel in-flight transfers and wait until each has recorded its
    /// outcome. Calling it when stopped is a no-op.
    pub async fn stop(&mut self) -> Result<(), QueueError> {
        if let Some(running) = self.running.take() {
            running.shutdown.cancel();
            if let Err(e) = running.handle.await {
                error!("Scheduler task ended abnormally: {}", e);
                self.dispatcher.store.fail_in_flight("scheduler fault");
                return Err(QueueError::SchedulerFault(e.to_string()));
            }
        }

        match self.take_fault() {
            Some(fault) => Err(QueueError::SchedulerFault(fault)),
            None => Ok(()),
        }
    }
}

impl Drop for LocalScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown.cancel();
        }
    }
}
