//! Shared state handed to every handler.

use crate::services::{
    auth::PrincipalResolver, thumbnail_service::ThumbnailService,
    upload_service::VideoUploadService, video_repository::VideoRepository,
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub videos: Arc<dyn VideoRepository>,
    pub auth: Arc<dyn PrincipalResolver>,
    pub uploads: Arc<VideoUploadService>,
    pub thumbnails: Arc<ThumbnailService>,
    /// Directory `/readyz` exercises; the same one uploads are staged in.
    pub temp_dir: PathBuf,
}
