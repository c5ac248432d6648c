//! Geometry probing and aspect-ratio classification.

use crate::media::command::{run_tool, stderr_text};
use async_trait::async_trait;
use serde::Deserialize;
use std::{ffi::OsStr, fmt, io, path::Path, process::ExitStatus};
use thiserror::Error;

const LANDSCAPE_RATIO: f64 = 16.0 / 9.0;
const PORTRAIT_RATIO: f64 = 9.0 / 16.0;

/// Pixel dimensions of the first video stream in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn ratio(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }
}

/// Closed taxonomy a video's shape is sorted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectClass {
    Landscape,
    Portrait,
    Other,
}

impl AspectClass {
    /// Classify by absolute distance from 16:9, then 9:16.
    ///
    /// The comparison is strict, so a ratio sitting exactly `tolerance` away
    /// from a reference lands in `Other`. Degenerate geometry (zero height)
    /// yields a non-finite ratio and also lands in `Other`.
    pub fn classify(geometry: Geometry, tolerance: f64) -> Self {
        Self::from_ratio(geometry.ratio(), tolerance)
    }

    pub fn from_ratio(ratio: f64, tolerance: f64) -> Self {
        if (ratio - LANDSCAPE_RATIO).abs() < tolerance {
            Self::Landscape
        } else if (ratio - PORTRAIT_RATIO).abs() < tolerance {
            Self::Portrait
        } else {
            Self::Other
        }
    }

    /// Key namespace segment for this class.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "landscape",
            Self::Portrait => "portrait",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for AspectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to spawn prober: {0}")]
    Spawn(#[source] io::Error),
    #[error("prober exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },
    #[error("unparseable prober output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no video stream found")]
    NoStreamFound,
}

/// Reads the geometry of a fully written local media file.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<Geometry, ProbeError>;
}

/// `Prober` backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    program: String,
}

impl FfprobeProber {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    #[tracing::instrument(skip(self), fields(program = %self.program))]
    async fn probe(&self, path: &Path) -> Result<Geometry, ProbeError> {
        let mut args: Vec<&OsStr> = [
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-select_streams",
            "v",
        ]
        .into_iter()
        .map(OsStr::new)
        .collect();
        args.push(path.as_os_str());

        let output = run_tool(&self.program, args)
            .await
            .map_err(ProbeError::Spawn)?;

        if !output.status.success() {
            let stderr = stderr_text(&output);
            tracing::error!(status = %output.status, %stderr, "ffprobe failed");
            return Err(ProbeError::Exit {
                status: output.status,
                stderr,
            });
        }

        let geometry = parse_probe_output(&output.stdout)?;
        tracing::debug!(
            width = geometry.width,
            height = geometry.height,
            "probe completed"
        );
        Ok(geometry)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    disposition: StreamDisposition,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDisposition {
    #[serde(default)]
    attached_pic: u8,
}

/// Pick the first video stream carrying dimensions out of ffprobe's JSON.
/// Embedded cover art (`attached_pic`) is reported as a video stream and is skipped.
pub fn parse_probe_output(stdout: &[u8]) -> Result<Geometry, ProbeError> {
    let parsed: ProbeOutput = serde_json::from_slice(stdout)?;
    parsed
        .streams
        .into_iter()
        .filter(|s| s.codec_type.as_deref().is_none_or(|t| t == "video"))
        .filter(|s| s.disposition.attached_pic == 0)
        .find_map(|s| match (s.width, s.height) {
            (Some(width), Some(height)) => Some(Geometry { width, height }),
            _ => None,
        })
        .ok_or(ProbeError::NoStreamFound)
}
