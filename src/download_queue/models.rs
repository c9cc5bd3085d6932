//! Data models for the download queue.
//!
//! Defines track descriptors, queue items, statuses, settings and snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Error text recorded on items aborted by a stop request.
pub const CANCELLED_ERROR: &str = "cancelled";

/// Audio fidelity tier requested from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioQuality {
    Low,
    High,
    #[default]
    Lossless,
    HiRes,
}

impl AudioQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioQuality::Low => "LOW",
            AudioQuality::High => "HIGH",
            AudioQuality::Lossless => "LOSSLESS",
            AudioQuality::HiRes => "HI_RES",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(AudioQuality::Low),
            "HIGH" => Some(AudioQuality::High),
            "LOSSLESS" => Some(AudioQuality::Lossless),
            "HI_RES" | "HI-RES" | "HIRES" => Some(AudioQuality::HiRes),
            _ => None,
        }
    }

    /// File extension of the container the catalog serves for this tier.
    pub fn file_extension(&self) -> &'static str {
        match self {
            AudioQuality::Low | AudioQuality::High => "m4a",
            AudioQuality::Lossless | AudioQuality::HiRes => "flac",
        }
    }
}

/// Which writer owns the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    /// Transfers are streamed by this process.
    #[default]
    Local,
    /// A remote service downloads; the store mirrors its state.
    Delegated,
}

impl QueueMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueMode::Local => "local",
            QueueMode::Delegated => "delegated",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Some(QueueMode::Local),
            "delegated" | "server" | "remote" => Some(QueueMode::Delegated),
            _ => None,
        }
    }
}

/// Lifecycle status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Downloading,
    Completed, // terminal
    Failed,    // terminal until retried
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Downloading => "downloading",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

/// A validated request for one track. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub catalog_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(default)]
    pub quality: AudioQuality,
}

impl TrackDescriptor {
    pub fn new(
        catalog_id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        quality: AudioQuality,
    ) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            title: title.into(),
            artist: artist.into(),
            album: String::new(),
            cover: None,
            quality,
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = album.into();
        self
    }

    pub fn with_cover(mut self, cover: impl Into<String>) -> Self {
        self.cover = Some(cover.into());
        self
    }
}

/// Reasons a raw descriptor is rejected at the ingress boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing catalog id")]
    MissingCatalogId,

    #[error("invalid catalog id: {0}")]
    InvalidCatalogId(String),

    #[error("unknown quality tier: {0}")]
    UnknownQuality(String),
}

/// Loosely typed descriptor as supplied by callers (JSON, presentation layer).
///
/// Catalog ids may arrive as numbers or strings and under several keys.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RawTrackDescriptor {
    #[serde(alias = "catalogId", alias = "track_id", alias = "trackId", alias = "id")]
    pub catalog_id: Option<JsonValue>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    #[serde(alias = "cover_url", alias = "coverUrl")]
    pub cover: Option<String>,
    pub quality: Option<String>,
}

impl RawTrackDescriptor {
    /// Validate into a closed [`TrackDescriptor`], falling back to
    /// `default_quality` when no tier was given.
    pub fn validate(self, default_quality: AudioQuality) -> Result<TrackDescriptor, ValidationError> {
        let catalog_id = match self.catalog_id {
            None | Some(JsonValue::Null) => return Err(ValidationError::MissingCatalogId),
            Some(JsonValue::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ValidationError::MissingCatalogId);
                }
                trimmed.to_string()
            }
            Some(JsonValue::Number(n)) => n.to_string(),
            Some(other) => return Err(ValidationError::InvalidCatalogId(other.to_string())),
        };

        let quality = match self.quality {
            Some(q) => AudioQuality::from_str(&q).ok_or(ValidationError::UnknownQuality(q))?,
            None => default_quality,
        };

        Ok(TrackDescriptor {
            catalog_id,
            title: self.title.unwrap_or_default(),
            artist: self.artist.unwrap_or_default(),
            album: self.album.unwrap_or_default(),
            cover: self.cover.filter(|c| !c.is_empty()),
            quality,
        })
    }
}

/// A track request plus its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique for the store's lifetime
    pub id: String,
    #[serde(flatten)]
    pub track: TrackDescriptor,
    pub status: QueueStatus,
    /// 0-100, meaningful only while downloading
    pub progress: u8,
    /// Set only when failed
    pub error: Option<String>,
    /// Unix timestamps in milliseconds
    pub added_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,
    /// Set only when completed
    pub filename: Option<String>,
}

impl QueueItem {
    pub(crate) fn new(id: String, track: TrackDescriptor, added_at: i64) -> Self {
        Self {
            id,
            track,
            status: QueueStatus::Queued,
            progress: 0,
            error: None,
            added_at,
            started_at: None,
            completed_at: None,
            failed_at: None,
            filename: None,
        }
    }

    pub fn catalog_id(&self) -> &str {
        &self.track.catalog_id
    }

    /// True for items aborted by a stop rather than a transfer error.
    /// They can still be retried.
    pub fn was_cancelled(&self) -> bool {
        self.status == QueueStatus::Failed && self.error.as_deref() == Some(CANCELLED_ERROR)
    }

    /// Reset lifecycle fields so the item can be dispatched again.
    pub(crate) fn reset_for_retry(&mut self) {
        self.status = QueueStatus::Queued;
        self.progress = 0;
        self.error = None;
        self.started_at = None;
        self.completed_at = None;
        self.failed_at = None;
        self.filename = None;
    }
}

/// Runtime-tunable queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub quality: AudioQuality,
    pub max_concurrent: usize,
    pub mode: QueueMode,
}

pub const DEFAULT_MAX_CONCURRENT: usize = 3;

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            quality: AudioQuality::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            mode: QueueMode::default(),
        }
    }
}

/// Result of an enqueue batch.
///
/// `added + duplicates + invalid` always equals the batch length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueResult {
    pub added: usize,
    pub duplicates: usize,
    #[serde(default)]
    pub invalid: usize,
}

/// Counts per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub downloading: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl QueueStats {
    /// Nothing left to dispatch or transfer.
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.downloading == 0
    }
}

/// Point-in-time copy of the four collections and the settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub queued: Vec<QueueItem>,
    pub downloading: Vec<QueueItem>,
    pub completed: Vec<QueueItem>,
    pub failed: Vec<QueueItem>,
    pub settings: QueueSettings,
}

impl QueueSnapshot {
    pub fn stats(&self) -> QueueStats {
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

    /// Look up an item in any collection.
    pub fn find(&self, id: &str) -> Option<&QueueItem> {
        self.queued
            .iter()
            .chain(&self.downloading)
            .chain(&self.completed)
            .chain(&self.failed)
            .find(|item| item.id == id)
    }
}
