use crate::{
    media::{probe::ProbeError, remux::RemuxError},
    services::{
        auth::AuthError, keys::KeyError, storage_service::StoreError,
        video_repository::RepoError,
    },
};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;
use uuid::Uuid;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

/// Every way an upload request can end early.
///
/// The `Display` text carries internal detail for logs; callers only ever
/// see [`UploadError::public_message`].
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),
    #[error("video `{0}` not found")]
    NotFound(Uuid),
    #[error("principal `{principal}` does not own video `{video_id}`")]
    Forbidden { video_id: Uuid, principal: Uuid },
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("unsupported media type `{0}`")]
    UnsupportedMediaType(String),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("staging failed: {0}")]
    Staging(#[source] io::Error),
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("remux failed: {0}")]
    Remux(#[from] RemuxError),
    #[error("key generation failed: {0}")]
    KeyGeneration(#[from] KeyError),
    #[error("object upload failed: {0}")]
    Upload(#[source] StoreError),
    #[error("record lookup failed: {0}")]
    RecordLookup(#[source] RepoError),
    #[error("record update failed: {0}")]
    RecordPersist(#[source] RepoError),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MalformedRequest(_) | Self::UnsupportedMediaType(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Staging(_)
            | Self::Probe(_)
            | Self::Remux(_)
            | Self::KeyGeneration(_)
            | Self::Upload(_)
            | Self::RecordLookup(_)
            | Self::RecordPersist(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short, stable text safe to return to the client.
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthorized(_) => "missing or invalid bearer token".into(),
            Self::NotFound(_) => "video not found".into(),
            Self::Forbidden { .. } => "you do not own this video".into(),
            Self::MalformedRequest(detail) => format!("malformed request: {}", detail),
            Self::UnsupportedMediaType(found) => format!("unsupported media type `{}`", found),
            Self::PayloadTooLarge(_) => "upload exceeds the configured size limit".into(),
            Self::Staging(_) => "could not stage upload".into(),
            Self::Probe(ProbeError::NoStreamFound) => "no video stream found in upload".into(),
            Self::Probe(_) => "could not inspect video".into(),
            Self::Remux(_) => "could not process video for streaming".into(),
            Self::KeyGeneration(_) => "could not allocate storage key".into(),
            Self::Upload(_) => "could not store video".into(),
            Self::RecordLookup(_) => "could not load video".into(),
            Self::RecordPersist(_) => "could not save video".into(),
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(error = %err, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %err, status = status.as_u16(), "request rejected");
        }
        AppError::new(status, err.public_message())
    }
}

impl From<MultipartError> for UploadError {
    fn from(err: MultipartError) -> Self {
        match err.status() {
            StatusCode::PAYLOAD_TOO_LARGE => Self::PayloadTooLarge(err.body_text()),
            status if status.is_client_error() => Self::MalformedRequest(err.body_text()),
            _ => Self::Staging(io::Error::other(err.body_text())),
        }
    }
}
