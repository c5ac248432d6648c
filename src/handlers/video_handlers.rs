//! HTTP handlers for video records and their media.
//!
//! Authentication and the id check happen before the multipart body is
//! touched; the orchestrators take over from the first matching form field
//! and stream it to disk themselves.

use crate::{
    errors::{AppError, UploadError},
    models::video::Video,
    services::{auth::bearer_token, upload_service::authorize},
    state::AppState,
};
use axum::{
    Json,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::HeaderMap,
};
use uuid::Uuid;

const VIDEO_FIELD: &str = "video";
const THUMBNAIL_FIELD: &str = "thumbnail";

fn parse_video_id(raw: &str) -> Result<Uuid, UploadError> {
    Uuid::parse_str(raw)
        .map_err(|_| UploadError::MalformedRequest(format!("invalid video id `{}`", raw)))
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Uuid, UploadError> {
    let token = bearer_token(headers)?;
    Ok(state.auth.resolve(token)?)
}

async fn open_multipart(state: &AppState, request: Request) -> Result<Multipart, UploadError> {
    Multipart::from_request(request, state)
        .await
        .map_err(|rejection| UploadError::MalformedRequest(rejection.body_text()))
}

/// `POST /api/videos/{id}/upload`
///
/// Multipart form with a `video` file part of type `video/mp4`. Responds with
/// the updated record.
pub async fn upload_video(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    request: Request,
) -> Result<Json<Video>, AppError> {
    let video_id = parse_video_id(&raw_id)?;
    let principal = authenticate(&state, request.headers())?;
    let mut multipart = open_multipart(&state, request).await?;

    while let Some(field) = multipart.next_field().await.map_err(UploadError::from)? {
        if field.name() != Some(VIDEO_FIELD) {
            continue;
        }
        let declared = field.content_type().map(str::to_owned);
        let video = state
            .uploads
            .handle_upload(video_id, principal, field, declared.as_deref())
            .await?;
        return Ok(Json(video));
    }

    Err(UploadError::MalformedRequest(format!("missing `{}` form field", VIDEO_FIELD)).into())
}

/// `POST /api/videos/{id}/thumbnail`
pub async fn upload_thumbnail(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    request: Request,
) -> Result<Json<Video>, AppError> {
    let video_id = parse_video_id(&raw_id)?;
    let principal = authenticate(&state, request.headers())?;
    let mut multipart = open_multipart(&state, request).await?;

    while let Some(field) = multipart.next_field().await.map_err(UploadError::from)? {
        if field.name() != Some(THUMBNAIL_FIELD) {
            continue;
        }
        let declared = field.content_type().map(str::to_owned);
        let video = state
            .thumbnails
            .handle_upload(video_id, principal, field, declared.as_deref())
            .await?;
        return Ok(Json(video));
    }

    Err(UploadError::MalformedRequest(format!("missing `{}` form field", THUMBNAIL_FIELD)).into())
}

/// `GET /api/videos/{id}`, visible to the owner only.
pub async fn get_video(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Video>, AppError> {
    let video_id = parse_video_id(&raw_id)?;
    let principal = authenticate(&state, &headers)?;
    let video = authorize(state.videos.as_ref(), video_id, principal).await?;
    Ok(Json(video))
}
