//! Test data and queue construction helpers

use super::constants::*;
use pezzottify_download_queue::config::{AppConfig, CliConfig, FileConfig, TimingsConfig};
use pezzottify_download_queue::download_queue::{DownloadQueue, QueueStats, RawTrackDescriptor};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Deterministic pseudo audio content for a catalog id.
pub fn audio_bytes(catalog_id: &str, len: usize) -> Vec<u8> {
    let seed = catalog_id.bytes().fold(7u8, |acc, b| acc.wrapping_mul(31).wrapping_add(b));
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

pub fn raw_track(catalog_id: &str, title: &str) -> RawTrackDescriptor {
    RawTrackDescriptor {
        catalog_id: Some(serde_json::json!(catalog_id)),
        title: Some(title.to_string()),
        artist: Some(ARTIST_NAME.to_string()),
        album: Some("First Album".to_string()),
        ..Default::default()
    }
}

pub fn raw_track_with_quality(catalog_id: &str, title: &str, quality: &str) -> RawTrackDescriptor {
    RawTrackDescriptor {
        quality: Some(quality.to_string()),
        ..raw_track(catalog_id, title)
    }
}

fn fast_timings() -> TimingsConfig {
    TimingsConfig {
        idle_poll_interval_ms: Some(20),
        inter_transfer_delay_ms: Some(0),
        sync_interval_ms: Some(TEST_SYNC_INTERVAL_MS),
    }
}

/// Config for a local-mode queue writing into `download_dir`.
pub fn local_config(resolver_url: &str, download_dir: &TempDir, max_concurrent: usize) -> AppConfig {
    let cli = CliConfig {
        download_dir: Some(download_dir.path().to_path_buf()),
        resolver_url: Some(resolver_url.to_string()),
        request_timeout_sec: 5,
        max_concurrent: Some(max_concurrent),
        ..Default::default()
    };
    let file = FileConfig {
        timings: Some(fast_timings()),
        ..Default::default()
    };
    AppConfig::resolve(&cli, Some(file)).expect("Failed to resolve local config")
}

/// Config for a delegated-mode queue that can also switch to local.
pub fn delegated_config(remote_url: &str, resolver_url: &str, download_dir: &TempDir) -> AppConfig {
    let cli = CliConfig {
        download_dir: Some(download_dir.path().to_path_buf()),
        resolver_url: Some(resolver_url.to_string()),
        remote_url: Some(remote_url.to_string()),
        request_timeout_sec: 5,
        mode: Some("delegated".to_string()),
        ..Default::default()
    };
    let file = FileConfig {
        timings: Some(fast_timings()),
        ..Default::default()
    };
    AppConfig::resolve(&cli, Some(file)).expect("Failed to resolve delegated config")
}

/// Poll the queue until `condition` holds.
///
/// # Panics
///
/// Panics if the condition does not hold within `QUEUE_WAIT_TIMEOUT_MS`.
pub async fn wait_for_stats(queue: &DownloadQueue, condition: impl Fn(&QueueStats) -> bool) {
    let deadline = Instant::now() + Duration::from_millis(QUEUE_WAIT_TIMEOUT_MS);
    loop {
        let stats = queue.get_stats();
        if condition(&stats) {
            return;
        }
        if Instant::now() > deadline {
            panic!("Queue condition not met in time, stats: {:?}", stats);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
