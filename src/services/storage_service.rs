//! src/services/storage_service.rs
//!
//! Object storage for processed videos. `ObjectStorage` is the seam the upload
//! pipeline writes through; `LocalObjectStorage` keeps objects on local disk
//! beneath `base_path/{key}` and is the default backend.

use async_trait::async_trait;
use futures::StreamExt;
use md5::Context;
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("store rejected object `{key}`: {reason}")]
    Rejected { key: String, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What the store acknowledged for a single `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub e_tag: Option<String>,
    pub size_bytes: u64,
}

/// Durable object storage addressed by key.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store the full contents of the local file `source` under `key`.
    ///
    /// A single attempt; callers decide whether to resubmit.
    async fn put_file(
        &self,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> StoreResult<PutOutcome>;

    /// Public URL an object stored under `key` is reachable at.
    fn url_for(&self, key: &str) -> String;
}

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects keys that begin with `/` or contain `..`.
pub fn ensure_key_safe(key: &str) -> StoreResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.contains("..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(StoreError::InvalidObjectKey(key.to_string()));
    }
    Ok(())
}

/// Filesystem-backed object storage.
#[derive(Clone, Debug)]
pub struct LocalObjectStorage {
    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// URL prefix the base directory is served under.
    pub public_base: String,
}

impl LocalObjectStorage {
    pub fn new(base_path: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    /// Copy `source` into place.
    ///
    /// - Streams into a `.tmp-{uuid}` sibling while computing the MD5 etag.
    /// - fsyncs, then renames over any previous object at `key`.
    /// - Removes the temp file on every error.
    async fn put_file(
        &self,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> StoreResult<PutOutcome> {
        ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        match copy_with_digest(source, &tmp_path).await {
            Ok((size_bytes, etag)) => {
                if let Err(err) = fs::rename(&tmp_path, &file_path).await {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
                tracing::info!(
                    key = %key,
                    content_type,
                    size_bytes,
                    etag = %etag,
                    "stored object on local disk"
                );
                Ok(PutOutcome {
                    e_tag: Some(etag),
                    size_bytes,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(StoreError::Io(err))
            }
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}

async fn copy_with_digest(source: &Path, dest: &Path) -> io::Result<(u64, String)> {
    let input = File::open(source).await?;
    let mut output = File::create(dest).await?;

    let mut size_bytes: u64 = 0;
    let mut digest = Context::new();
    let mut chunks = ReaderStream::new(input);
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as u64;
        digest.consume(&chunk);
        output.write_all(&chunk).await?;
    }
    output.flush().await?;
    output.sync_all().await?;

    Ok((size_bytes, format!("{:x}", digest.compute())))
}
