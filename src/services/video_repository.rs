//! Metadata store for video records, backed by SQLite.

use crate::models::video::Video;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("video `{0}` not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Fetch-by-id / update access to video records.
///
/// `update` is last-writer-wins; callers only ever write references they
/// produced themselves.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> RepoResult<Video>;
    async fn update(&self, video: &Video) -> RepoResult<()>;
}

#[derive(Clone)]
pub struct SqliteVideoRepository {
    db: Arc<SqlitePool>,
}

impl SqliteVideoRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new record. Records are normally created outside this
    /// service; this exists for seeding and tests.
    pub async fn insert(&self, video: &Video) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO videos (id, user_id, title, description, video_url, thumbnail_url,
                                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(video.id)
        .bind(video.user_id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.video_url)
        .bind(&video.thumbnail_url)
        .bind(video.created_at)
        .bind(video.updated_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VideoRepository for SqliteVideoRepository {
    async fn get(&self, id: Uuid) -> RepoResult<Video> {
        sqlx::query_as::<_, Video>(
            "SELECT id, user_id, title, description, video_url, thumbnail_url,
                    created_at, updated_at
             FROM videos WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => RepoError::NotFound(id),
            other => RepoError::Sqlx(other),
        })
    }

    async fn update(&self, video: &Video) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE videos
             SET title = ?, description = ?, video_url = ?, thumbnail_url = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.video_url)
        .bind(&video.thumbnail_url)
        .bind(video.updated_at)
        .bind(video.id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(video.id));
        }
        Ok(())
    }
}
