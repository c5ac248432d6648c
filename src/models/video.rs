//! Represents a video record owned by a single user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A video entry in the metadata store.
///
/// The record is created ahead of time; uploads only ever fill in or replace
/// the storage references (`video_url`, `thumbnail_url`).
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Video {
    /// Unique identifier, supplied by the client in the URL path.
    pub id: Uuid,

    /// Principal that owns this record. Only the owner may change its references.
    pub user_id: Uuid,

    pub title: String,

    pub description: Option<String>,

    /// Public URL of the processed video, set by a successful upload.
    pub video_url: Option<String>,

    /// Public URL of the thumbnail image.
    pub thumbnail_url: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Video {
    /// Build a fresh record with no storage references.
    pub fn new(user_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            description: None,
            video_url: None,
            thumbnail_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, principal: Uuid) -> bool {
        self.user_id == principal
    }
}
