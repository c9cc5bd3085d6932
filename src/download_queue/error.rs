//! Error types for queue operations and individual transfers.

use thiserror::Error;

use super::models::{QueueMode, CANCELLED_ERROR};

/// Errors returned by the queue facade.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue item not found: {0}")]
    NotFound(String),

    #[error("Track {0} is already queued, downloading or completed")]
    AlreadyActive(String),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("{mode} mode is not configured")]
    ModeUnavailable { mode: &'static str },

    #[error("{operation} is not supported in {mode} mode")]
    UnsupportedInMode {
        operation: &'static str,
        mode: &'static str,
    },

    #[error("Remote queue error: {0}")]
    Remote(#[from] anyhow::Error),

    #[error("Scheduler fault: {0}")]
    SchedulerFault(String),
}

impl QueueError {
    pub(crate) fn unsupported(operation: &'static str, mode: QueueMode) -> Self {
        QueueError::UnsupportedInMode {
            operation,
            mode: mode.as_str(),
        }
    }
}

/// Why a single transfer did not complete.
///
/// The `Display` text is what gets recorded on the failed item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("cancelled")]
    Cancelled,

    #[error("HTTP {0}")]
    Http(u16),

    #[error("Stream URL not found")]
    StreamUrlMissing,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Remote submission failed: {0}")]
    Remote(String),

    #[error("Transfer task panicked")]
    Panicked,
}

impl TransferError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => TransferError::Http(status.as_u16()),
            None => TransferError::Network(e.to_string()),
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::Storage(e.to_string())
    }
}
