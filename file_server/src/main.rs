//! HTTP face of the artifact store for split deployments: static reads under
//! `/files`, validated multipart writes under `/upload`, and a health probe.
//! Everything resolves through the canonical layout; nothing outside the
//! storage root is ever touched.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cv_storage::relative_path;
use cv_types::ArtifactKind;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

#[derive(Debug, Clone, Deserialize)]
struct Config {
    storage_root: PathBuf,

    #[serde(default = "default_host")]
    file_server_host: String,

    #[serde(default = "default_port")]
    file_server_port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4500
}

#[derive(Clone)]
struct AppState {
    root: Arc<PathBuf>,
    started_at: Instant,
}

fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/files/*path", get(serve_file))
        .route("/upload/*rest", post(upload).layer(DefaultBodyLimit::disable()))
        .route("/health", get(health))
}

#[tokio::main]
async fn main() {
    cv_app::init_tracing();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "file server exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config: Config = cv_app::load_config()?;
    tokio::fs::create_dir_all(&config.storage_root).await?;
    tokio::fs::create_dir_all(config.storage_root.join("tmp")).await?;

    let state = AppState {
        root: Arc::new(config.storage_root.clone()),
        started_at: Instant::now(),
    };

    cv_app::serve(state, &config.file_server_host, config.file_server_port, add_routes).await?;
    Ok(())
}

/// A relative path is servable when no component is a parent/root reference
/// and no component is a dotfile.
fn resolve_under_root(root: &Path, rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    for component in rel_path.components() {
        match component {
            Component::Normal(name) => {
                if name.to_string_lossy().starts_with('.') {
                    return None;
                }
            }
            _ => return None,
        }
    }
    Some(root.join(rel_path))
}

async fn serve_file(State(state): State<AppState>, UrlPath(path): UrlPath<String>) -> Response {
    let Some(full) = resolve_under_root(&state.root, &path) else {
        tracing::warn!(%path, "rejected file request outside storage root");
        return StatusCode::FORBIDDEN.into_response();
    };

    let file = match tokio::fs::File::open(&full).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            tracing::error!(%path, error = %e, "failed to open file");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let len = match file.metadata().await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(%path, error = %e, "failed to stat file");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let body = Body::from_stream(ReaderStream::new(file));
    (
        [
            (header::CONTENT_LENGTH, len.to_string()),
            (header::CONTENT_TYPE, content_type(&full).to_string()),
        ],
        body,
    )
        .into_response()
}

/// The handful of types the canonical layout actually produces.
fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mp4") => "video/mp4",
        Some("m4a") => "audio/mp4",
        Some("html") => "text/html; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn meeting_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,100}$").expect("meeting id regex is valid"))
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "success": false, "error": message }))).into_response()
}

async fn upload(
    State(state): State<AppState>,
    UrlPath(rest): UrlPath<String>,
    multipart: Multipart,
) -> Response {
    // Expect exactly `<kind>/<meetingId>`; anything else is malformed.
    let mut segments = rest.split('/');
    let (Some(kind_raw), Some(meeting_id), None) = (segments.next(), segments.next(), segments.next()) else {
        return bad_request("expected /upload/<kind>/<meetingId>");
    };

    let Some(kind) = ArtifactKind::parse(kind_raw) else {
        tracing::warn!(kind = %kind_raw, "rejected upload with unknown artifact kind");
        return bad_request("unknown artifact kind");
    };
    if !meeting_id_pattern().is_match(meeting_id) {
        tracing::warn!(%meeting_id, "rejected upload with invalid meeting id");
        return bad_request("invalid meeting id");
    }

    let rel = relative_path(kind, meeting_id);
    let Some(dest) = resolve_under_root(&state.root, &rel) else {
        tracing::error!(%rel, "resolved upload path escapes storage root");
        return StatusCode::FORBIDDEN.into_response();
    };

    match store_upload(&state.root, &dest, multipart).await {
        Ok(()) => {
            tracing::info!(%rel, "artifact uploaded");
            Json(json!({ "success": true, "path": rel })).into_response()
        }
        Err(UploadError::NoFileField) => bad_request("multipart body must carry a single 'file' field"),
        Err(UploadError::Multipart(e)) => {
            tracing::warn!(error = %e, "malformed multipart upload");
            bad_request("malformed multipart body")
        }
        Err(UploadError::Io(e)) => {
            tracing::error!(error = %e, "failed to store upload");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": "storage io error" })),
            )
                .into_response()
        }
    }
}

enum UploadError {
    NoFileField,
    Multipart(axum::extract::multipart::MultipartError),
    Io(std::io::Error),
}

/// Stage the upload in `<root>/tmp`, then rename into place. The staging file
/// is removed on every failure path.
async fn store_upload(root: &Path, dest: &Path, mut multipart: Multipart) -> Result<(), UploadError> {
    let staging = root.join("tmp").join(format!(
        "upload_{}_{}.part",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    if let Some(parent) = staging.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(UploadError::Io)?;
    }

    let result = receive_into(&staging, &mut multipart).await;
    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e);
    }

    if let Some(parent) = dest.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(UploadError::Io(e));
        }
    }
    if let Err(e) = tokio::fs::rename(&staging, dest).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(UploadError::Io(e));
    }
    Ok(())
}

async fn receive_into(staging: &Path, multipart: &mut Multipart) -> Result<(), UploadError> {
    while let Some(mut field) = multipart.next_field().await.map_err(UploadError::Multipart)? {
        if field.name() != Some("file") {
            continue;
        }

        let mut file = tokio::fs::File::create(staging).await.map_err(UploadError::Io)?;
        while let Some(chunk) = field.chunk().await.map_err(UploadError::Multipart)? {
            file.write_all(&chunk).await.map_err(UploadError::Io)?;
        }
        file.flush().await.map_err(UploadError::Io)?;
        return Ok(());
    }
    Err(UploadError::NoFileField)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "UP",
        "storage_root": state.root.display().to_string(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}
