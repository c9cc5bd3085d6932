//! Mock server lifecycle management
//!
//! Spawns the HTTP services the queue talks to: the catalog resolver (which
//! also hosts the audio files) and the remote queue service. Each test gets
//! isolated servers on random ports.

use super::constants::*;
use super::fixtures::audio_bytes;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let port = listener
        .local_addr()
        .expect("Failed to get local address")
        .port();
    (listener, format!("http://127.0.0.1:{}", port))
}

/// Serve `app` until the returned sender is dropped.
fn serve(listener: TcpListener, app: Router) -> oneshot::Sender<()> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
            .expect("Server failed");
    });
    shutdown_tx
}

/// Waits for a server to become ready by polling its /health endpoint
async fn wait_for_ready(base_url: &str) {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .expect("Failed to build reqwest client");

    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

    loop {
        if start.elapsed() > timeout {
            panic!(
                "Server did not become ready within {}ms",
                SERVER_READY_TIMEOUT_MS
            );
        }

        match client.get(format!("{}/health", base_url)).send().await {
            Ok(response) if response.status().is_success() => return,
            _ => tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await,
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

// ============================================================================
// Catalog Resolver + File Host
// ============================================================================

#[derive(Clone)]
struct CatalogState {
    base_url: String,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    missing: Arc<Mutex<HashSet<String>>>,
    /// (catalog id, quality) of every stream URL request
    requests: Arc<Mutex<Vec<(String, String)>>>,
}

/// Mock catalog service: resolves stream URLs and serves the audio bytes.
pub struct MockCatalogServer {
    pub base_url: String,
    state: CatalogState,
    _shutdown_tx: oneshot::Sender<()>,
}

impl MockCatalogServer {
    /// Spawn a catalog serving the three regular test tracks plus the
    /// chunked, slow and URL-less special tracks.
    pub async fn spawn() -> Self {
        let (listener, base_url) = bind().await;

        let files: HashMap<String, Vec<u8>> = [TRACK_1_ID, TRACK_2_ID, TRACK_3_ID]
            .iter()
            .map(|id| (id.to_string(), audio_bytes(id, TRACK_SIZE_BYTES)))
            .collect();

        let state = CatalogState {
            base_url: base_url.clone(),
            files: Arc::new(Mutex::new(files)),
            missing: Arc::new(Mutex::new(HashSet::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        };

        let app = Router::new()
            .route("/health", get(health))
            .route("/track/{id}/stream", get(resolve_stream))
            .route("/files/{id}", get(serve_file))
            .with_state(state.clone());

        let shutdown_tx = serve(listener, app);
        wait_for_ready(&base_url).await;

        Self {
            base_url,
            state,
            _shutdown_tx: shutdown_tx,
        }
    }

    /// Make the resolver answer 404 for `catalog_id` (or stop doing so).
    pub fn set_missing(&self, catalog_id: &str, missing: bool) {
        let mut set = self.state.missing.lock().unwrap();
        if missing {
            set.insert(catalog_id.to_string());
        } else {
            set.remove(catalog_id);
        }
    }

    pub fn stream_requests(&self) -> Vec<(String, String)> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn file_content(&self, catalog_id: &str) -> Vec<u8> {
        self.state
            .files
            .lock()
            .unwrap()
            .get(catalog_id)
            .cloned()
            .expect("unknown test track")
    }
}

async fn resolve_stream(
    State(state): State<CatalogState>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let quality = query.get("quality").cloned().unwrap_or_default();
    state.requests.lock().unwrap().push((id.clone(), quality));

    if state.missing.lock().unwrap().contains(&id) {
        return StatusCode::NOT_FOUND.into_response();
    }
    if id == NO_URL_TRACK_ID {
        return Json(json!({ "track_id": id })).into_response();
    }
    Json(json!({ "streamUrl": format!("{}/files/{}", state.base_url, id) })).into_response()
}

fn delayed_stream(total: usize, chunk: usize, delay: Duration) -> Response {
    let stream = futures::stream::unfold(0usize, move |sent| async move {
        if sent >= total {
            return None;
        }
        if sent > 0 {
            tokio::time::sleep(delay).await;
        }
        let len = chunk.min(total - sent);
        Some((Ok::<_, std::io::Error>(Bytes::from(vec![0xAB; len])), sent + len))
    });

    Response::builder()
        .header(header::CONTENT_LENGTH, total)
        .body(Body::from_stream(stream))
        .expect("valid response")
}

async fn serve_file(State(state): State<CatalogState>, Path(id): Path<String>) -> Response {
    if id.starts_with("chunked-") {
        return delayed_stream(
            CHUNK_SIZE_BYTES * CHUNKED_TRACK_CHUNKS,
            CHUNK_SIZE_BYTES,
            Duration::from_millis(CHUNK_DELAY_MS),
        );
    }
    if id.starts_with("slow-") {
        return delayed_stream(
            SLOW_TRACK_TOTAL_BYTES,
            CHUNK_SIZE_BYTES,
            Duration::from_millis(SLOW_CHUNK_DELAY_MS),
        );
    }

    match state.files.lock().unwrap().get(&id) {
        Some(content) => content.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ============================================================================
// Remote Queue Service
// ============================================================================

#[derive(Default)]
struct RemoteState {
    queued: Vec<Value>,
    downloading: Vec<Value>,
    completed: Vec<Value>,
    failed: Vec<Value>,
    settings: Value,
    offline: bool,
    add_requests: usize,
    removed: Vec<String>,
    retry_all_requests: usize,
}

impl RemoteState {
    fn contains_active(&self, track_id: &Value) -> bool {
        self.queued
            .iter()
            .chain(&self.downloading)
            .chain(&self.completed)
            .any(|item| &item["trackId"] == track_id)
    }

    fn take(list: &mut Vec<Value>, track_id: &str) -> Option<Value> {
        let pos = list
            .iter()
            .position(|item| item["trackId"].as_str() == Some(track_id))?;
        Some(list.remove(pos))
    }
}

type SharedRemote = Arc<Mutex<RemoteState>>;

/// Mock remote queue service for delegated mode.
pub struct MockRemoteQueueServer {
    pub base_url: String,
    state: SharedRemote,
    _shutdown_tx: oneshot::Sender<()>,
}

impl MockRemoteQueueServer {
    pub async fn spawn() -> Self {
        let (listener, base_url) = bind().await;

        let state: SharedRemote = Arc::new(Mutex::new(RemoteState {
            settings: json!({ "maxConcurrent": 3, "quality": "LOSSLESS", "mode": "delegated" }),
            ..Default::default()
        }));

        let app = Router::new()
            .route("/health", get(health))
            .route("/queue", get(get_queue))
            .route("/queue/add", post(add_items))
            .route("/queue/retry-all", post(retry_all))
            .route("/queue/settings", get(get_settings).post(update_settings))
            .route("/queue/{id}", delete(remove_item))
            .with_state(state.clone());

        let shutdown_tx = serve(listener, app);
        wait_for_ready(&base_url).await;

        Self {
            base_url,
            state,
            _shutdown_tx: shutdown_tx,
        }
    }

    /// Make `GET /queue` answer 503.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Move the queued item for `track_id` to downloading at `progress`.
    pub fn start_download(&self, track_id: &str, progress: f64) {
        let mut state = self.state.lock().unwrap();
        let mut item = RemoteState::take(&mut state.queued, track_id).expect("item not queued");
        item["progress"] = json!(progress);
        state.downloading.push(item);
    }

    pub fn complete(&self, track_id: &str, filename: &str) {
        let mut state = self.state.lock().unwrap();
        let mut item =
            RemoteState::take(&mut state.downloading, track_id).expect("item not downloading");
        item["filename"] = json!(filename);
        item["progress"] = json!(100);
        state.completed.push(item);
    }

    pub fn fail(&self, track_id: &str, error: &str) {
        let mut state = self.state.lock().unwrap();
        let mut item =
            RemoteState::take(&mut state.downloading, track_id).expect("item not downloading");
        item["error"] = json!(error);
        state.failed.push(item);
    }

    pub fn settings(&self) -> Value {
        self.state.lock().unwrap().settings.clone()
    }

    pub fn add_requests(&self) -> usize {
        self.state.lock().unwrap().add_requests
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn retry_all_requests(&self) -> usize {
        self.state.lock().unwrap().retry_all_requests
    }
}

async fn get_queue(State(state): State<SharedRemote>) -> Response {
    let state = state.lock().unwrap();
    if state.offline {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({
        "queued": state.queued,
        "downloading": state.downloading,
        "completed": state.completed,
        "failed": state.failed,
    }))
    .into_response()
}

async fn add_items(State(state): State<SharedRemote>, Json(body): Json<Value>) -> Json<Value> {
    let mut state = state.lock().unwrap();
    state.add_requests += 1;

    let mut added = 0;
    let mut duplicates = 0;
    for item in body["items"].as_array().cloned().unwrap_or_default() {
        let track_id = item["trackId"].clone();
        if state.contains_active(&track_id) {
            duplicates += 1;
            continue;
        }
        if let Some(id) = track_id.as_str() {
            RemoteState::take(&mut state.failed, id);
        }
        state.queued.push(json!({
            "id": format!("remote-{}", track_id.as_str().unwrap_or_default()),
            "trackId": track_id,
            "title": item["title"],
            "artist": item["artist"],
            "album": item["album"],
            "quality": item["quality"],
        }));
        added += 1;
    }

    Json(json!({ "added": added, "duplicates": duplicates }))
}

async fn remove_item(State(state): State<SharedRemote>, Path(id): Path<String>) -> StatusCode {
    let mut state = state.lock().unwrap();
    let before = state.queued.len();
    state.queued.retain(|item| item["id"].as_str() != Some(id.as_str()));
    if state.queued.len() == before {
        return StatusCode::NOT_FOUND;
    }
    state.removed.push(id);
    StatusCode::NO_CONTENT
}

async fn retry_all(State(state): State<SharedRemote>) -> StatusCode {
    let mut state = state.lock().unwrap();
    state.retry_all_requests += 1;
    let failed = std::mem::take(&mut state.failed);
    for mut item in failed {
        if let Some(object) = item.as_object_mut() {
            object.remove("error");
            object.remove("progress");
        }
        state.queued.push(item);
    }
    StatusCode::OK
}

async fn get_settings(State(state): State<SharedRemote>) -> Json<Value> {
    Json(state.lock().unwrap().settings.clone())
}

async fn update_settings(
    State(state): State<SharedRemote>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut state = state.lock().unwrap();
    if let (Some(settings), Some(update)) = (state.settings.as_object_mut(), body.as_object()) {
        for (key, value) in update {
            // The service keeps its own mode.
            if key != "mode" {
                settings.insert(key.clone(), value.clone());
            }
        }
    }
    Json(state.settings.clone())
}
