use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pezzottify_download_queue::config::{AppConfig, CliConfig, FileConfig};
use pezzottify_download_queue::download_queue::{
    DownloadQueue, QueueSnapshot, RawTrackDescriptor,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// JSON file containing an array of tracks to download.
    #[clap(value_parser = parse_path)]
    pub tracks_json: PathBuf,

    /// Path to a TOML config file. Its values override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory downloaded files are written to.
    #[clap(long, value_parser = parse_path)]
    pub download_dir: Option<PathBuf>,

    /// Base URL of the catalog service that resolves stream URLs.
    #[clap(long)]
    pub resolver_url: Option<String>,

    /// Base URL of the remote queue service (delegated mode).
    #[clap(long)]
    pub remote_url: Option<String>,

    /// Timeout in seconds for catalog and remote queue requests.
    #[clap(long, default_value_t = 30)]
    pub request_timeout_sec: u64,

    /// Execution mode: local or delegated.
    #[clap(long)]
    pub mode: Option<String>,

    /// Quality tier: LOW, HIGH, LOSSLESS or HI_RES.
    #[clap(long)]
    pub quality: Option<String>,

    /// Maximum number of concurrent transfers.
    #[clap(long)]
    pub max_concurrent: Option<usize>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            download_dir: self.download_dir.clone(),
            resolver_url: self.resolver_url.clone(),
            remote_url: self.remote_url.clone(),
            request_timeout_sec: self.request_timeout_sec,
            mode: self.mode.clone(),
            quality: self.quality.clone(),
            max_concurrent: self.max_concurrent,
        }
    }
}

fn load_tracks(path: &Path) -> Result<Vec<RawTrackDescriptor>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tracks file: {:?}", path))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse tracks file: {:?}", path))
}

/// One bar per downloading item, keyed by item id.
struct ProgressView {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: HashMap<String, ProgressBar>,
}

impl ProgressView {
    fn new() -> Result<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.green} {msg:40!} [{bar:30.cyan/blue}] {pos:>3}%",
        )
        .context("Invalid progress template")?
        .progress_chars("=> ");
        Ok(Self {
            multi: MultiProgress::new(),
            style,
            bars: HashMap::new(),
        })
    }

    fn render(&mut self, snapshot: &QueueSnapshot) {
        let multi = &self.multi;
        let style = &self.style;
        for item in &snapshot.downloading {
            let bar = self.bars.entry(item.id.clone()).or_insert_with(|| {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(style.clone());
                bar.set_message(format!("{} - {}", item.track.artist, item.track.title));
                bar
            });
            bar.set_position(item.progress as u64);
        }

        let finished: Vec<String> = self
            .bars
            .keys()
            .filter(|id| !snapshot.downloading.iter().any(|item| &item.id == *id))
            .cloned()
            .collect();
        for id in finished {
            if let Some(bar) = self.bars.remove(&id) {
                bar.finish_and_clear();
                self.multi.remove(&bar);
            }
            if let Some(item) = snapshot.find(&id) {
                let line = match (&item.filename, &item.error) {
                    (Some(filename), _) => format!("done    {}", filename),
                    (None, Some(error)) => format!("failed  {}: {}", item.track.title, error),
                    (None, None) => format!("done    {}", item.track.title),
                };
                let _ = self.multi.println(line);
            }
        }
    }

    fn clear(&mut self) {
        for (_, bar) in self.bars.drain() {
            bar.finish_and_clear();
        }
    }
}

/// Why the CLI stopped waiting on the queue.
#[derive(Debug, PartialEq, Eq)]
enum RunEnd {
    /// Nothing queued or downloading.
    Idle,
    /// The queue stopped running on its own, e.g. after a scheduler fault.
    Halted,
    Interrupted,
}

/// How often liveness is checked when no snapshot arrives.
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Render snapshots until the queue is idle, stops running or `interrupt`
/// resolves.
async fn wait_until_settled(
    queue: &DownloadQueue,
    snapshot_rx: &mut watch::Receiver<QueueSnapshot>,
    mut render: impl FnMut(&QueueSnapshot),
    interrupt: impl Future<Output = ()>,
) -> RunEnd {
    tokio::pin!(interrupt);

    loop {
        let snapshot = snapshot_rx.borrow_and_update().clone();
        render(&snapshot);
        if snapshot.stats().is_idle() {
            return RunEnd::Idle;
        }
        if !queue.is_running().await {
            return RunEnd::Halted;
        }

        tokio::select! {
            changed = snapshot_rx.changed() => {
                if changed.is_err() {
                    return RunEnd::Halted;
                }
            }
            _ = tokio::time::sleep(LIVENESS_CHECK_INTERVAL) => {}
            _ = &mut interrupt => return RunEnd::Interrupted,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    let tracks = load_tracks(&cli_args.tracks_json)?;
    info!(
        "Loaded {} tracks, mode={}, quality={}, max_concurrent={}, download_dir={:?}",
        tracks.len(),
        config.settings.mode.as_str(),
        config.settings.quality.as_str(),
        config.settings.max_concurrent,
        config.download_dir
    );

    let queue = DownloadQueue::from_config(&config)?;

    // Listeners run synchronously inside store mutations; hand snapshots to
    // the render loop through a watch channel.
    let (snapshot_tx, mut snapshot_rx) = watch::channel(queue.snapshot());
    let _subscription = queue.subscribe(move |snapshot| {
        snapshot_tx.send_replace(snapshot.clone());
    });

    let result = queue.enqueue_raw(tracks).await?;
    info!(
        "Added {} tracks ({} duplicates, {} invalid)",
        result.added, result.duplicates, result.invalid
    );

    queue.start().await?;

    let mut view = ProgressView::new()?;
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    match wait_until_settled(&queue, &mut snapshot_rx, |snapshot| view.render(snapshot), ctrl_c).await {
        RunEnd::Idle => {}
        RunEnd::Halted => warn!("Queue stopped with items left"),
        RunEnd::Interrupted => warn!("Interrupted, stopping queue"),
    }

    let stopped = queue.stop().await;
    view.clear();

    let stats = queue.get_stats();
    println!(
        "Completed: {}  Failed: {}  Queued: {}  Total: {}",
        stats.completed, stats.failed, stats.queued, stats.total
    );
    for item in queue.snapshot().failed {
        println!(
            "  {} - {}: {}",
            item.track.artist,
            item.track.title,
            item.error.as_deref().unwrap_or("unknown error")
        );
    }

    stopped.context("Queue stopped with a fault")?;
    Ok(())
}
