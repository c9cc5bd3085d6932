mod file_config;

pub use file_config::{FileConfig, TimingsConfig};

use crate::download_queue::{AudioQuality, QueueMode, QueueSettings, QueueTimings};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
pub const DEFAULT_REQUEST_TIMEOUT_SEC: u64 = 30;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub download_dir: Option<PathBuf>,
    pub resolver_url: Option<String>,
    pub remote_url: Option<String>,
    pub request_timeout_sec: u64,
    pub mode: Option<String>,
    pub quality: Option<String>,
    pub max_concurrent: Option<usize>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            resolver_url: None,
            remote_url: None,
            request_timeout_sec: DEFAULT_REQUEST_TIMEOUT_SEC,
            mode: None,
            quality: None,
            max_concurrent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub download_dir: PathBuf,
    pub resolver_url: Option<String>,
    pub remote_url: Option<String>,
    pub request_timeout_sec: u64,

    // Initial queue settings, tunable at runtime
    pub settings: QueueSettings,
    pub timings: QueueTimings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let download_dir = file
            .download_dir
            .map(PathBuf::from)
            .or_else(|| cli.download_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR));

        let resolver_url = file.resolver_url.or_else(|| cli.resolver_url.clone());
        let remote_url = file.remote_url.or_else(|| cli.remote_url.clone());
        let request_timeout_sec = file.request_timeout_sec.unwrap_or(cli.request_timeout_sec);

        let mode = match file.mode.or_else(|| cli.mode.clone()) {
            Some(s) => match QueueMode::from_str(&s) {
                Some(mode) => mode,
                None => bail!("Unknown mode: {} (expected local or delegated)", s),
            },
            None => QueueMode::default(),
        };

        let quality = match file.quality.or_else(|| cli.quality.clone()) {
            Some(s) => match AudioQuality::from_str(&s) {
                Some(quality) => quality,
                None => bail!("Unknown quality: {} (expected LOW, HIGH, LOSSLESS or HI_RES)", s),
            },
            None => AudioQuality::default(),
        };

        let max_concurrent = file
            .max_concurrent
            .or(cli.max_concurrent)
            .unwrap_or(QueueSettings::default().max_concurrent);
        if max_concurrent == 0 {
            bail!("max_concurrent must be at least 1");
        }

        match mode {
            QueueMode::Delegated if remote_url.is_none() => {
                bail!("Delegated mode requires remote_url via --remote-url or in config file")
            }
            QueueMode::Local if resolver_url.is_none() => {
                bail!("Local mode requires resolver_url via --resolver-url or in config file")
            }
            _ => {}
        }

        // Timings - merge file config with defaults
        let timings_file = file.timings.unwrap_or_default();
        let defaults = QueueTimings::default();
        let timings = QueueTimings {
            idle_poll_interval: timings_file
                .idle_poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_poll_interval),
            inter_transfer_delay: timings_file
                .inter_transfer_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.inter_transfer_delay),
            sync_interval: timings_file
                .sync_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.sync_interval),
        };
        if timings.idle_poll_interval.is_zero() {
            bail!("idle_poll_interval_ms must be greater than 0");
        }
        if timings.sync_interval.is_zero() {
            bail!("sync_interval_ms must be greater than 0");
        }

        if download_dir.exists() && !download_dir.is_dir() {
            bail!("download_dir is not a directory: {:?}", download_dir);
        }
        std::fs::create_dir_all(&download_dir)
            .with_context(|| format!("Failed to create download directory: {:?}", download_dir))?;

        Ok(Self {
            download_dir,
            resolver_url,
            remote_url,
            request_timeout_sec,
            settings: QueueSettings {
                quality,
                max_concurrent,
                mode,
            },
            timings,
        })
    }
}
