//! Client-streamed transfer strategy.
//!
//! Resolves a stream URL, streams the body into `<name>.<item id>.part`
//! inside the download directory and renames it once complete. The item id
//! keeps concurrent transfers of same-named tracks apart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::TransferError;
use super::models::QueueItem;
use super::transfer::{
    output_filename, percent_of, sanitize_filename, ProgressSink, TransferExecutor,
    TransferOutcome,
};
use crate::clients::StreamResolver;

/// Default pause between transfers to avoid hammering the resolver.
pub const DEFAULT_INTER_TRANSFER_DELAY: Duration = Duration::from_secs(1);

/// Streams tracks from the catalog into a local directory.
pub struct LocalTransfer {
    resolver: Arc<dyn StreamResolver>,
    http: reqwest::Client,
    download_dir: PathBuf,
    cooldown: Duration,
}

impl LocalTransfer {
    pub fn new(
        resolver: Arc<dyn StreamResolver>,
        http: reqwest::Client,
        download_dir: PathBuf,
        cooldown: Duration,
    ) -> Self {
        Self {
            resolver,
            http,
            download_dir,
            cooldown,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Resolve, stream and write. Returns the number of bytes written.
    async fn transfer(
        &self,
        item: &QueueItem,
        dest: &Path,
        part: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<u64, TransferError> {
        let stream_url = self
            .resolver
            .resolve_stream_url(&item.track.catalog_id, item.track.quality)
            .await?;

        let response = self.http.get(&stream_url).send().await?;
        if !response.status().is_success() {
            return Err(TransferError::Http(response.status().as_u16()));
        }

        // Unknown or zero length means no progress events.
        let total = response.content_length().filter(|len| *len > 0);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(part).await?;

        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        let mut last_percent: u8 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            if let Some(total) = total {
                let percent = percent_of(received, total);
                if percent > last_percent {
                    last_percent = percent;
                    progress.report(percent);
                }
            }
        }

        file.flush().await?;
        drop(file);

        // Another item with the same name may have finished first.
        if tokio::fs::try_exists(dest).await? {
            info!(
                "{:?} appeared while downloading {}, keeping the existing file",
                dest, item.id
            );
            remove_partial(part).await;
            return Ok(received);
        }
        tokio::fs::rename(part, dest).await?;

        Ok(received)
    }
}

fn part_path(dest: &Path, item_id: &str) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.part", sanitize_filename(item_id)));
    dest.with_file_name(name)
}

async fn remove_partial(part: &Path) {
    match tokio::fs::remove_file(part).await {
        Ok(()) => debug!("Removed partial file {:?}", part),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial file {:?}: {}", part, e),
    }
}

#[async_trait]
impl TransferExecutor for LocalTransfer {
    async fn execute(
        &self,
        item: &QueueItem,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let filename = output_filename(&item.track);
        let dest = self.download_dir.join(&filename);
        let part = part_path(&dest, &item.id);

        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            info!("{} already exists, skipping download", filename);
            return TransferOutcome::Completed { filename, bytes: 0 };
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            result = self.transfer(item, &dest, &part, progress) => result,
        };

        match result {
            Ok(bytes) => {
                info!(
                    "Downloaded {} ({:#})",
                    filename,
                    byte_unit::Byte::from(bytes)
                );
                TransferOutcome::Completed { filename, bytes }
            }
            Err(e) => {
                remove_partial(&part).await;
                TransferOutcome::Failed(e)
            }
        }
    }

    fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
