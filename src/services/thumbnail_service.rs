//! Thumbnail images, staged privately and then published into the assets directory.

use crate::{
    errors::UploadError,
    models::video::Video,
    services::{staging, upload_service::authorize, video_repository::VideoRepository},
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use uuid::Uuid;

/// Map an accepted image media type to the extension it is stored under.
pub fn image_extension(declared: Option<&str>) -> Result<&'static str, UploadError> {
    let raw = declared
        .ok_or_else(|| UploadError::MalformedRequest("missing content type".into()))?;
    let parsed: mime::Mime = raw
        .parse()
        .map_err(|_| UploadError::MalformedRequest(format!("invalid content type `{}`", raw)))?;

    if parsed.type_() == mime::IMAGE && parsed.subtype() == mime::JPEG {
        Ok("jpg")
    } else if parsed.type_() == mime::IMAGE && parsed.subtype() == mime::PNG {
        Ok("png")
    } else {
        Err(UploadError::UnsupportedMediaType(
            parsed.essence_str().to_string(),
        ))
    }
}

pub struct ThumbnailService {
    videos: Arc<dyn VideoRepository>,
    assets_dir: PathBuf,
    temp_dir: PathBuf,
    public_url: String,
    max_bytes: u64,
}

impl ThumbnailService {
    pub fn new(
        videos: Arc<dyn VideoRepository>,
        assets_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
        public_url: impl Into<String>,
        max_bytes: u64,
    ) -> Self {
        Self {
            videos,
            assets_dir: assets_dir.into(),
            temp_dir: temp_dir.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    #[tracing::instrument(skip(self, body), fields(video_id = %video_id, user_id = %principal))]
    pub async fn handle_upload<S, E>(
        &self,
        video_id: Uuid,
        principal: Uuid,
        body: S,
        declared_content_type: Option<&str>,
    ) -> Result<Video, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<UploadError>,
    {
        let mut video = authorize(self.videos.as_ref(), video_id, principal).await?;
        let extension = image_extension(declared_content_type)?;

        // Staged outside the served tree so partial uploads are never public.
        let (staged, bytes) = staging::stage_body(
            body,
            &self.temp_dir,
            "thumbnail",
            extension,
            self.max_bytes,
        )
        .await?;

        let file_name = format!("{}.{}", video_id, extension);
        staged
            .persist(&self.assets_dir.join(&file_name))
            .await
            .map_err(UploadError::Staging)?;
        remove_stale_variants(&self.assets_dir, video_id, extension).await;
        tracing::info!(bytes, file = %file_name, "thumbnail stored");

        video.thumbnail_url = Some(format!("{}/assets/{}", self.public_url, file_name));
        video.updated_at = Utc::now();
        self.videos
            .update(&video)
            .await
            .map_err(UploadError::RecordPersist)?;

        Ok(video)
    }
}

/// Drop `<id>.<ext>` for every accepted extension other than `keep`.
async fn remove_stale_variants(assets_dir: &Path, video_id: Uuid, keep: &str) {
    for extension in ["jpg", "png"].into_iter().filter(|e| *e != keep) {
        let path = assets_dir.join(format!("{}.{}", video_id, extension));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "removed previous thumbnail"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove previous thumbnail")
            }
        }
    }
}
