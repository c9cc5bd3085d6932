use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub download_dir: Option<String>,
    pub resolver_url: Option<String>,
    pub remote_url: Option<String>,
    pub request_timeout_sec: Option<u64>,
    pub mode: Option<String>,
    pub quality: Option<String>,
    pub max_concurrent: Option<usize>,

    // Timing knobs
    pub timings: Option<TimingsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TimingsConfig {
    pub idle_poll_interval_ms: Option<u64>,
    pub inter_transfer_delay_ms: Option<u64>,
    pub sync_interval_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
