//! Pezzottify Download Queue Library
//!
//! This library exposes the queue, its HTTP clients and the config layer for
//! the CLI and for testing.

pub mod clients;
pub mod config;
pub mod download_queue;

// Re-export commonly used types for convenience
pub use config::{AppConfig, CliConfig, FileConfig};
pub use download_queue::{
    AudioQuality, DownloadQueue, QueueError, QueueItem, QueueMode, QueueSettings, QueueSnapshot,
    QueueStats, QueueStatus, TrackDescriptor,
};
