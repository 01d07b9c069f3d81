//! In-process fake S5 portal for end-to-end tests
#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, head, post},
    Json, Router,
};
use base64::Engine;
use parking_lot::Mutex;
use s5_sdk::client::Config;
use s5_sdk::crypto::{hashing::hash, Cid};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::TcpListener;

const TUS_VERSION: &str = "1.0.0";

/// A multipart upload as the portal saw it
#[derive(Clone, Debug)]
pub struct SmallUpload {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub len: usize,
    pub dry_run: bool,
}

struct TusUpload {
    length: u64,
    metadata: HashMap<String, String>,
    data: Vec<u8>,
}

pub struct FakePortal {
    base_url: OnceLock<String>,
    blobs: Mutex<HashMap<String, Bytes>>,
    uploads: Mutex<HashMap<String, TusUpload>>,
    patch_offsets: Mutex<Vec<u64>>,
    small_uploads: Mutex<Vec<SmallUpload>>,
    creations: AtomicUsize,
    create_attempts: AtomicUsize,
    patch_attempts: AtomicUsize,
    lookups: AtomicUsize,
    blob_fetches: AtomicUsize,
    fail_next_creates: AtomicUsize,
    fail_next_patches: AtomicUsize,
    freeze_offsets: AtomicBool,
    stall_at: AtomicU64,
    tamper: AtomicBool,
}

impl FakePortal {
    fn new() -> Self {
        Self {
            base_url: OnceLock::new(),
            blobs: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            patch_offsets: Mutex::new(Vec::new()),
            small_uploads: Mutex::new(Vec::new()),
            creations: AtomicUsize::new(0),
            create_attempts: AtomicUsize::new(0),
            patch_attempts: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
            blob_fetches: AtomicUsize::new(0),
            fail_next_creates: AtomicUsize::new(0),
            fail_next_patches: AtomicUsize::new(0),
            freeze_offsets: AtomicBool::new(false),
            stall_at: AtomicU64::new(u64::MAX),
            tamper: AtomicBool::new(false),
        }
    }

    /// Start a portal on a random local port
    pub async fn spawn() -> Arc<Self> {
        let portal = Arc::new(Self::new());
        let app = Router::new()
            .route("/s5/upload", post(small_upload))
            .route("/s5/upload/tus", post(tus_create))
            .route("/s5/upload/tus/{id}", head(tus_head).patch(tus_patch))
            .route("/s5/debug/storage_locations/{hash}", get(storage_locations))
            .route("/s5/blob/{cid}", get(blob_by_cid))
            .route("/blob/{hash}", get(blob_by_hash))
            .layer(DefaultBodyLimit::max(128 * 1024 * 1024))
            .with_state(portal.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        portal.base_url.set(format!("http://{addr}")).unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        portal
    }

    pub fn url(&self) -> String {
        self.base_url.get().cloned().unwrap_or_default()
    }

    /// Client config pointing here, with short retry delays
    pub fn config(&self) -> Config {
        Config::new(self.url()).with_retry_delays(vec![Duration::from_millis(10); 3])
    }

    pub fn blob(&self, hash_b64: &str) -> Option<Bytes> {
        self.blobs.lock().get(hash_b64).cloned()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().len()
    }

    /// Offsets of every accepted PATCH, in arrival order
    pub fn patch_offsets(&self) -> Vec<u64> {
        self.patch_offsets.lock().clone()
    }

    pub fn small_uploads(&self) -> Vec<SmallUpload> {
        self.small_uploads.lock().clone()
    }

    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    /// Every POST to the tus endpoint, including rejected ones
    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    /// Every PATCH that reached the portal, including rejected ones
    pub fn patch_attempts(&self) -> usize {
        self.patch_attempts.load(Ordering::SeqCst)
    }

    /// Storage location lookups plus blob fetches
    pub fn download_requests(&self) -> usize {
        self.lookups.load(Ordering::SeqCst) + self.blob_fetches.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Answer the next `n` PATCH requests with a 500
    pub fn fail_next_patches(&self, n: usize) {
        self.fail_next_patches.store(n, Ordering::SeqCst);
    }

    /// Answer the next `n` tus creation requests with a 500
    pub fn fail_next_creates(&self, n: usize) {
        self.fail_next_creates.store(n, Ordering::SeqCst);
    }

    /// Accept PATCH requests without storing them, echoing the unchanged offset
    pub fn freeze_offsets(&self, freeze: bool) {
        self.freeze_offsets.store(freeze, Ordering::SeqCst);
    }

    /// Never answer PATCH requests at or beyond `offset`
    pub fn stall_at(&self, offset: u64) {
        self.stall_at.store(offset, Ordering::SeqCst);
    }

    pub fn release_stall(&self) {
        self.stall_at.store(u64::MAX, Ordering::SeqCst);
    }

    /// Flip a byte in every blob served
    pub fn tamper_blobs(&self, tamper: bool) {
        self.tamper.store(tamper, Ordering::SeqCst);
    }
}

/// Install a log subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic pseudo-random content
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    use rand::{RngCore, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn parse_metadata(value: &str) -> HashMap<String, String> {
    value
        .split(',')
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, ' ');
            let key = parts.next()?.to_string();
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(parts.next().unwrap_or_default())
                .ok()?;
            Some((key, String::from_utf8(decoded).ok()?))
        })
        .collect()
}

async fn small_upload(
    State(portal): State<Arc<FakePortal>>,
    Query(query): Query<HashMap<String, String>>,
    mut multipart: Multipart,
) -> Response {
    let dry_run = query.get("dryrun").map(String::as_str) == Some("true");
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        };

        portal.small_uploads.lock().push(SmallUpload {
            filename,
            content_type,
            len: data.len(),
            dry_run,
        });
        let digest = hash(&data);
        if !dry_run {
            portal
                .blobs
                .lock()
                .insert(digest.to_multihash().to_base64url(), data.clone());
        }
        let cid = Cid::from_hash(digest, data.len() as u64).encode();
        return Json(json!({ "cid": cid })).into_response();
    }
    (StatusCode::BAD_REQUEST, Json(json!({ "message": "missing file field" }))).into_response()
}

async fn tus_create(State(portal): State<Arc<FakePortal>>, headers: HeaderMap) -> Response {
    portal.create_attempts.fetch_add(1, Ordering::SeqCst);
    if portal
        .fail_next_creates
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return (StatusCode::SERVICE_UNAVAILABLE, "injected failure").into_response();
    }
    let Some(length) = header_u64(&headers, "upload-length") else {
        return (StatusCode::BAD_REQUEST, "missing Upload-Length").into_response();
    };
    let metadata = headers
        .get("upload-metadata")
        .and_then(|v| v.to_str().ok())
        .map(parse_metadata)
        .unwrap_or_default();

    let id = uuid::Uuid::new_v4().simple().to_string();
    portal.uploads.lock().insert(
        id.clone(),
        TusUpload {
            length,
            metadata,
            data: Vec::new(),
        },
    );
    portal.creations.fetch_add(1, Ordering::SeqCst);

    (
        StatusCode::CREATED,
        [
            ("location", format!("/s5/upload/tus/{id}")),
            ("tus-resumable", TUS_VERSION.to_string()),
        ],
    )
        .into_response()
}

async fn tus_head(State(portal): State<Arc<FakePortal>>, Path(id): Path<String>) -> Response {
    let found = portal
        .uploads
        .lock()
        .get(&id)
        .map(|upload| (upload.data.len() as u64, upload.length));
    match found {
        Some((offset, length)) => (
            StatusCode::OK,
            [
                ("upload-offset", offset.to_string()),
                ("upload-length", length.to_string()),
                ("tus-resumable", TUS_VERSION.to_string()),
            ],
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn tus_patch(
    State(portal): State<Arc<FakePortal>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(offset) = header_u64(&headers, "upload-offset") else {
        return (StatusCode::BAD_REQUEST, "missing Upload-Offset").into_response();
    };
    portal.patch_attempts.fetch_add(1, Ordering::SeqCst);
    if offset >= portal.stall_at.load(Ordering::SeqCst) {
        std::future::pending::<()>().await;
    }
    if portal
        .fail_next_patches
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return (StatusCode::INTERNAL_SERVER_ERROR, "injected failure").into_response();
    }

    let mut uploads = portal.uploads.lock();
    let Some(upload) = uploads.get_mut(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if upload.data.len() as u64 != offset {
        return (StatusCode::CONFLICT, "offset mismatch").into_response();
    }
    if portal.freeze_offsets.load(Ordering::SeqCst) {
        return (
            StatusCode::NO_CONTENT,
            [
                ("upload-offset", offset.to_string()),
                ("tus-resumable", TUS_VERSION.to_string()),
            ],
        )
            .into_response();
    }
    if offset + body.len() as u64 > upload.length {
        return (StatusCode::BAD_REQUEST, "upload exceeds declared length").into_response();
    }

    upload.data.extend_from_slice(&body);
    portal.patch_offsets.lock().push(offset);
    let new_offset = upload.data.len() as u64;

    if new_offset == upload.length {
        let digest = hash(&upload.data).to_multihash().to_base64url();
        if upload.metadata.get("hash") != Some(&digest) {
            return (StatusCode::BAD_REQUEST, "hash mismatch").into_response();
        }
        portal
            .blobs
            .lock()
            .insert(digest, Bytes::from(upload.data.clone()));
    }

    (
        StatusCode::NO_CONTENT,
        [
            ("upload-offset", new_offset.to_string()),
            ("tus-resumable", TUS_VERSION.to_string()),
        ],
    )
        .into_response()
}

async fn storage_locations(State(portal): State<Arc<FakePortal>>, Path(hash): Path<String>) -> Response {
    portal.lookups.fetch_add(1, Ordering::SeqCst);
    if !portal.blobs.lock().contains_key(&hash) {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "blob not found" }))).into_response();
    }
    Json(json!({
        "locations": [
            { "type": 3, "parts": [format!("{}/blob/{}", portal.url(), hash)] }
        ]
    }))
    .into_response()
}

async fn blob_by_hash(State(portal): State<Arc<FakePortal>>, Path(hash): Path<String>) -> Response {
    portal.blob_fetches.fetch_add(1, Ordering::SeqCst);
    serve_blob(&portal, &hash)
}

async fn blob_by_cid(State(portal): State<Arc<FakePortal>>, Path(cid): Path<String>) -> Response {
    match Cid::decode(&cid) {
        Ok(cid) => serve_blob(&portal, &cid.hash().to_base64url()),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

fn serve_blob(portal: &FakePortal, hash: &str) -> Response {
    let Some(data) = portal.blob(hash) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if portal.tamper.load(Ordering::SeqCst) && !data.is_empty() {
        let mut tampered = data.to_vec();
        let middle = tampered.len() / 2;
        tampered[middle] ^= 0x01;
        return tampered.into_response();
    }
    data.into_response()
}
