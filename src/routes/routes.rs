//! Defines the HTTP surface of the ingest service.
//!
//! ## Structure
//! - `GET  /healthz`, `GET /readyz` — liveness and readiness
//! - `GET  /api/videos/{id}` — read a record (owner only)
//! - `POST /api/videos/{id}/upload` — multipart `video` upload
//! - `POST /api/videos/{id}/thumbnail` — multipart `thumbnail` upload
//! - `GET  /assets/*` — thumbnails, straight from the assets dir
//! - `GET  /objects/*` — processed videos, only with the local storage backend

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        video_handlers::{get_video, upload_thumbnail, upload_video},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::path::PathBuf;
use tower_http::{services::ServeDir, trace::TraceLayer};

/// Room for multipart boundaries and part headers on top of the file limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Directories served as static files.
#[derive(Debug, Clone)]
pub struct StaticMounts {
    pub assets_dir: PathBuf,
    /// Set when processed videos live on local disk.
    pub objects_dir: Option<PathBuf>,
}

fn body_limit(file_limit: u64) -> DefaultBodyLimit {
    let limit = usize::try_from(file_limit)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);
    DefaultBodyLimit::max(limit)
}

/// Build the router with its shared state applied.
pub fn routes(state: AppState, mounts: StaticMounts) -> Router {
    let upload_limit = body_limit(state.uploads.settings().max_upload_bytes);
    let thumbnail_limit = body_limit(state.thumbnails.max_bytes());

    let mut router: Router<AppState> = Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/videos/{id}", get(get_video))
        .route(
            "/api/videos/{id}/upload",
            post(upload_video).layer(upload_limit),
        )
        .route(
            "/api/videos/{id}/thumbnail",
            post(upload_thumbnail).layer(thumbnail_limit),
        )
        .nest_service("/assets", ServeDir::new(mounts.assets_dir));

    if let Some(objects_dir) = mounts.objects_dir {
        router = router.nest_service("/objects", ServeDir::new(objects_dir));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
