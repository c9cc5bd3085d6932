//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{local_config, MockCatalogServer};
//! use pezzottify_download_queue::DownloadQueue;
//!
//! #[tokio::test]
//! async fn test_download() {
//!     let catalog = MockCatalogServer::spawn().await;
//!     let dir = tempfile::TempDir::new().unwrap();
//!     let queue = DownloadQueue::from_config(&local_config(&catalog.base_url, &dir, 2)).unwrap();
//! }
//! ```

#![allow(dead_code)]

mod constants;
mod fixtures;
mod server;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{
    audio_bytes, delegated_config, local_config, raw_track, raw_track_with_quality,
    wait_for_stats,
};
#[allow(unused_imports)]
pub use server::{MockCatalogServer, MockRemoteQueueServer};
