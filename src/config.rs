use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, path::PathBuf, str::FromStr};

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 1 << 30;
const DEFAULT_MAX_THUMBNAIL_BYTES: u64 = 10 << 20;

/// Which object storage backend receives the processed videos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    Local,
    S3,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            other => bail!("unknown storage backend `{}` (expected `local` or `s3`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub public_url: String,
    pub assets_dir: PathBuf,
    pub storage: StorageBackend,
    pub object_dir: PathBuf,
    pub s3_bucket: Option<String>,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub ffprobe_path: String,
    pub ffmpeg_path: String,
    pub upload: UploadSettings,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Video ingest API")]
pub struct Args {
    /// Host to bind to (overrides VIDEO_INGEST_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides VIDEO_INGEST_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides VIDEO_INGEST_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Storage backend for processed videos (overrides VIDEO_INGEST_STORAGE)
    #[arg(long, value_enum)]
    pub storage: Option<StorageBackend>,

    /// Directory for staged uploads (overrides VIDEO_INGEST_TEMP_DIR)
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Knobs of the upload pipeline, passed explicitly into the orchestrator.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// The only media type accepted for video uploads.
    pub video_mime: String,
    /// Extension appended to every generated storage key.
    pub file_extension: String,
    /// Absolute tolerance when matching a ratio against 16:9 or 9:16.
    pub aspect_tolerance: f64,
    /// Random bytes per storage key.
    pub key_bytes: usize,
    pub temp_dir: PathBuf,
    pub temp_prefix: String,
    pub remux_suffix: String,
    pub max_upload_bytes: u64,
    pub max_thumbnail_bytes: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            video_mime: "video/mp4".into(),
            file_extension: "mp4".into(),
            aspect_tolerance: 0.1,
            key_bytes: 32,
            temp_dir: env::temp_dir(),
            temp_prefix: "video-ingest-upload".into(),
            remux_suffix: ".processing".into(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_thumbnail_bytes: DEFAULT_MAX_THUMBNAIL_BYTES,
        }
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let env_host = env::var("VIDEO_INGEST_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("VIDEO_INGEST_PORT", 8091u16)?;
        let env_db = env::var("VIDEO_INGEST_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/videos.db".into());
        let env_storage = parse_env("VIDEO_INGEST_STORAGE", StorageBackend::Local)?;
        let jwt_secret =
            env::var("VIDEO_INGEST_JWT_SECRET").context("VIDEO_INGEST_JWT_SECRET must be set")?;

        let port = args.port.unwrap_or(env_port);
        let public_url = env::var("VIDEO_INGEST_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port));

        let mut upload = UploadSettings {
            max_upload_bytes: parse_env("VIDEO_INGEST_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            ..UploadSettings::default()
        };
        if let Some(dir) = args
            .temp_dir
            .or_else(|| env::var("VIDEO_INGEST_TEMP_DIR").ok().map(PathBuf::from))
        {
            upload.temp_dir = dir;
        }

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port,
            database_url: args.database_url.unwrap_or(env_db),
            jwt_secret,
            public_url: public_url.trim_end_matches('/').to_string(),
            assets_dir: env::var("VIDEO_INGEST_ASSETS_DIR")
                .unwrap_or_else(|_| "./data/assets".into())
                .into(),
            storage: args.storage.unwrap_or(env_storage),
            object_dir: env::var("VIDEO_INGEST_OBJECT_DIR")
                .unwrap_or_else(|_| "./data/objects".into())
                .into(),
            s3_bucket: env::var("VIDEO_INGEST_S3_BUCKET").ok(),
            s3_region: env::var("VIDEO_INGEST_S3_REGION").unwrap_or_else(|_| "us-east-1".into()),
            s3_endpoint: env::var("VIDEO_INGEST_S3_ENDPOINT").ok(),
            ffprobe_path: env::var("VIDEO_INGEST_FFPROBE").unwrap_or_else(|_| "ffprobe".into()),
            ffmpeg_path: env::var("VIDEO_INGEST_FFMPEG").unwrap_or_else(|_| "ffmpeg".into()),
            upload,
        };

        if cfg.storage == StorageBackend::S3 && cfg.s3_bucket.is_none() {
            bail!("VIDEO_INGEST_S3_BUCKET must be set when the s3 storage backend is selected");
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read `name` from the environment, falling back to `default` when unset.
/// A present but unparseable value is an error rather than a silent default.
fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
