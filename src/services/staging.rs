//! Local staging of inbound bodies and scoped cleanup of temp artifacts.

use crate::errors::UploadError;
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use uuid::Uuid;

/// A local file that is unlinked when the guard goes out of scope.
///
/// Every temp file the pipeline creates is wrapped in one of these before
/// anything is written to it, so early returns, panics and dropped request
/// futures all release it.
#[derive(Debug)]
pub struct TempArtifact {
    path: Option<PathBuf>,
}

impl TempArtifact {
    /// Take ownership of `path`; the file does not need to exist yet.
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Create a new, uniquely named empty file in `dir`.
    pub async fn create(dir: &Path, prefix: &str, extension: &str) -> io::Result<(Self, File)> {
        let path = dir.join(format!("{}-{}.{}", prefix, Uuid::new_v4(), extension));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        Ok((Self::adopt(path), file))
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Move the file to `dest` and stop tracking it.
    ///
    /// Falls back to copy-then-rename when `dest` is on another filesystem,
    /// so `dest` never holds a partial file.
    pub async fn persist(mut self, dest: &Path) -> io::Result<PathBuf> {
        let src = self.path.take().unwrap_or_default();
        match fs::rename(&src, dest).await {
            Ok(()) => Ok(dest.to_path_buf()),
            Err(err) => {
                // keep the source tracked; it is removed when `self` drops
                self.path = Some(src);
                if err.kind() != ErrorKind::CrossesDevices {
                    return Err(err);
                }
                copy_into_place(self.path(), dest).await?;
                Ok(dest.to_path_buf())
            }
        }
    }
}

/// Copy `src` to a hidden sibling of `dest`, then rename it over `dest`.
async fn copy_into_place(src: &Path, dest: &Path) -> io::Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| io::Error::other("destination has no parent directory"))?;
    let mut tmp = TempArtifact::adopt(parent.join(format!(".tmp-{}", Uuid::new_v4())));
    fs::copy(src, tmp.path()).await?;
    File::open(tmp.path()).await?.sync_all().await?;
    fs::rename(tmp.path(), dest).await?;
    tmp.path = None;
    Ok(())
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed temp artifact"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove temp artifact")
            }
        }
    }
}

/// Drain `body` into a fresh temp file under `dir`.
///
/// Fails with `PayloadTooLarge` as soon as more than `limit` bytes arrive and
/// with `MalformedRequest` when the body is empty. The partially written file
/// is removed on every error.
pub async fn stage_body<S, E>(
    body: S,
    dir: &Path,
    prefix: &str,
    extension: &str,
    limit: u64,
) -> Result<(TempArtifact, u64), UploadError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<UploadError>,
{
    let (artifact, mut file) = TempArtifact::create(dir, prefix, extension)
        .await
        .map_err(UploadError::Staging)?;

    let mut written: u64 = 0;
    pin_mut!(body);
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => return Err(err.into()),
        };
        written += chunk.len() as u64;
        if written > limit {
            return Err(UploadError::PayloadTooLarge(format!(
                "body exceeds {} bytes",
                limit
            )));
        }
        file.write_all(&chunk).await.map_err(UploadError::Staging)?;
    }
    file.flush().await.map_err(UploadError::Staging)?;
    file.sync_all().await.map_err(UploadError::Staging)?;

    if written == 0 {
        return Err(UploadError::MalformedRequest("empty file".into()));
    }

    tracing::debug!(path = %artifact.path().display(), bytes = written, "staged upload body");
    Ok((artifact, written))
}
