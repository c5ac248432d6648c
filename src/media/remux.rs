//! Fast-start remuxing: move the container index ahead of the media data.

use crate::{
    media::command::{run_tool, stderr_text},
    services::staging::TempArtifact,
};
use async_trait::async_trait;
use std::{
    ffi::{OsStr, OsString},
    io,
    path::{Path, PathBuf},
    process::ExitStatus,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemuxError {
    #[error("failed to spawn remuxer: {0}")]
    Spawn(#[source] io::Error),
    #[error("remuxer exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },
}

/// Rewrites a local file for progressive playback without re-encoding.
///
/// The returned artifact is the new file; the input is left untouched.
#[async_trait]
pub trait Remuxer: Send + Sync {
    async fn remux(&self, input: &Path) -> Result<TempArtifact, RemuxError>;
}

/// `Remuxer` backed by `ffmpeg -c copy -movflags faststart`.
#[derive(Debug, Clone)]
pub struct FfmpegRemuxer {
    program: String,
    suffix: String,
}

impl FfmpegRemuxer {
    pub fn new(program: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            suffix: suffix.into(),
        }
    }

    /// `<input><suffix>`, e.g. `upload-1234.mp4.processing`.
    pub fn output_path(&self, input: &Path) -> PathBuf {
        let mut raw: OsString = input.as_os_str().to_owned();
        raw.push(&self.suffix);
        PathBuf::from(raw)
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    #[tracing::instrument(skip(self), fields(program = %self.program))]
    async fn remux(&self, input: &Path) -> Result<TempArtifact, RemuxError> {
        let output_path = self.output_path(input);
        // Registered before the child starts so a partial output never survives.
        let output = TempArtifact::adopt(&output_path);

        let args: Vec<&OsStr> = vec![
            OsStr::new("-y"),
            OsStr::new("-i"),
            input.as_os_str(),
            OsStr::new("-c"),
            OsStr::new("copy"),
            OsStr::new("-movflags"),
            OsStr::new("faststart"),
            OsStr::new("-f"),
            OsStr::new("mp4"),
            output_path.as_os_str(),
        ];

        let result = run_tool(&self.program, args)
            .await
            .map_err(RemuxError::Spawn)?;

        if !result.status.success() {
            let stderr = stderr_text(&result);
            tracing::error!(status = %result.status, %stderr, "ffmpeg remux failed");
            return Err(RemuxError::Exit {
                status: result.status,
                stderr,
            });
        }

        tracing::debug!(output = %output_path.display(), "remux completed");
        Ok(output)
    }
}
