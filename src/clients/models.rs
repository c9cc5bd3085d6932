//! Wire types for the remote queue service.
//!
//! These match the JSON the service returns and convert into queue models.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::download_queue::{
    AudioQuality, QueueItem, QueueMode, QueueSettings, QueueSnapshot, QueueStatus,
    TrackDescriptor,
};

/// Track entry sent with `POST /queue/add`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTrackRequest {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    pub quality: AudioQuality,
}

impl From<&TrackDescriptor> for RemoteTrackRequest {
    fn from(track: &TrackDescriptor) -> Self {
        Self {
            track_id: track.catalog_id.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            cover: track.cover.clone(),
            quality: track.quality,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteAddRequest {
    pub items: Vec<RemoteTrackRequest>,
}

/// Response of `POST /queue/add`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteAddResponse {
    #[serde(alias = "added_count", alias = "addedCount")]
    pub added: usize,
    #[serde(alias = "skipped", alias = "duplicate_count", alias = "duplicateCount")]
    pub duplicates: usize,
}

/// Queue entry as reported by `GET /queue`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteQueueItem {
    pub id: Option<JsonValue>,
    #[serde(alias = "track_id", alias = "catalogId", alias = "catalog_id")]
    pub track_id: Option<JsonValue>,
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(alias = "cover_url", alias = "coverUrl")]
    pub cover: Option<String>,
    pub quality: Option<String>,
    pub progress: Option<f64>,
    pub error: Option<String>,
    #[serde(alias = "added_at")]
    pub added_at: Option<i64>,
    #[serde(alias = "started_at")]
    pub started_at: Option<i64>,
    #[serde(alias = "completed_at")]
    pub completed_at: Option<i64>,
    #[serde(alias = "failed_at")]
    pub failed_at: Option<i64>,
    pub filename: Option<String>,
}

fn json_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl RemoteQueueItem {
    /// Convert into a queue item with the status of the collection it came
    /// from. Entries without a track id are dropped.
    pub fn into_queue_item(self, status: QueueStatus, default_quality: AudioQuality) -> Option<QueueItem> {
        let catalog_id = self.track_id.as_ref().and_then(json_id)?;
        // Without a remote id, the collection keeps a failed entry and its
        // requeued copy apart.
        let id = self
            .id
            .as_ref()
            .and_then(json_id)
            .unwrap_or_else(|| format!("{}:{}", status.as_str(), catalog_id));
        let quality = self
            .quality
            .as_deref()
            .and_then(AudioQuality::from_str)
            .unwrap_or(default_quality);
        let progress = match status {
            QueueStatus::Completed => 100,
            QueueStatus::Queued => 0,
            _ => self.progress.unwrap_or(0.0).clamp(0.0, 100.0) as u8,
        };

        Some(QueueItem {
            id,
            track: TrackDescriptor {
                catalog_id,
                title: self.title,
                artist: self.artist,
                album: self.album,
                cover: self.cover,
                quality,
            },
            status,
            progress,
            error: if status == QueueStatus::Failed {
                self.error
            } else {
                None
            },
            added_at: self.added_at.unwrap_or_default(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            filename: if status == QueueStatus::Completed {
                self.filename
            } else {
                None
            },
        })
    }
}

/// Response of `GET /queue`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteQueueState {
    #[serde(alias = "queue")]
    pub queued: Vec<RemoteQueueItem>,
    #[serde(alias = "active")]
    pub downloading: Vec<RemoteQueueItem>,
    pub completed: Vec<RemoteQueueItem>,
    pub failed: Vec<RemoteQueueItem>,
}

impl RemoteQueueState {
    /// Build a store snapshot, carrying over `settings` unchanged.
    pub fn into_snapshot(self, settings: QueueSettings) -> QueueSnapshot {
        let convert = |items: Vec<RemoteQueueItem>, status| {
            items
                .into_iter()
                .filter_map(|item| item.into_queue_item(status, settings.quality))
                .collect::<Vec<_>>()
        };

        QueueSnapshot {
            queued: convert(self.queued, QueueStatus::Queued),
            downloading: convert(self.downloading, QueueStatus::Downloading),
            completed: convert(self.completed, QueueStatus::Completed),
            failed: convert(self.failed, QueueStatus::Failed),
            settings,
        }
    }
}

/// Body of `GET/POST /queue/settings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSettings {
    #[serde(default, alias = "max_concurrent", skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl From<&QueueSettings> for RemoteSettings {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            max_concurrent: Some(settings.max_concurrent),
            quality: Some(settings.quality.as_str().to_string()),
            mode: Some(settings.mode.as_str().to_string()),
        }
    }
}

impl RemoteSettings {
    /// Apply acknowledged values on top of `base`. Unknown or missing fields
    /// leave the base value in place; the mode is never changed remotely.
    pub fn merge_into(&self, base: QueueSettings) -> QueueSettings {
        QueueSettings {
            quality: self
                .quality
                .as_deref()
                .and_then(AudioQuality::from_str)
                .unwrap_or(base.quality),
            max_concurrent: self
                .max_concurrent
                .filter(|n| *n > 0)
                .unwrap_or(base.max_concurrent),
            mode: base.mode,
        }
    }

    pub fn mode(&self) -> Option<QueueMode> {
        self.mode.as_deref().and_then(QueueMode::from_str)
    }
}
