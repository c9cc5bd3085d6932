//! Download Queue module
//!
//! Bounded-concurrency queue of track transfers. Tracks are either streamed
//! into a local directory or handed to a remote queue service whose state is
//! mirrored back into the store.

mod delegated_transfer;
mod error;
mod local_transfer;
mod models;
mod queue;
mod remote_sync;
mod scheduler;
mod store;
mod transfer;

pub use delegated_transfer::DelegatedTransfer;
pub use error::{QueueError, TransferError};
pub use local_transfer::{LocalTransfer, DEFAULT_INTER_TRANSFER_DELAY};
pub use models::*;
pub use queue::{DownloadQueue, QueueComponents, QueueTimings};
pub use remote_sync::{RemoteSyncAdapter, SnapshotWriter, DEFAULT_SYNC_INTERVAL};
pub use scheduler::{LocalScheduler, DEFAULT_IDLE_POLL_INTERVAL};
pub use store::{QueueListener, QueueStore, RetryOutcome, Subscription};
pub use transfer::{
    output_filename, sanitize_filename, ProgressSink, StoreProgress, TransferExecutor,
    TransferOutcome,
};
