use anyhow::{Context, Result};
use std::{fs, io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use video_ingest::{
    config::{AppConfig, StorageBackend},
    db,
    media::{probe::FfprobeProber, remux::FfmpegRemuxer},
    routes::routes::{StaticMounts, routes},
    services::{
        auth::JwtPrincipalResolver,
        keys::OsKeySource,
        s3_storage::{S3Location, S3ObjectStorage},
        storage_service::{LocalObjectStorage, ObjectStorage},
        thumbnail_service::ThumbnailService,
        upload_service::VideoUploadService,
        video_repository::{SqliteVideoRepository, VideoRepository},
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(
        addr = %cfg.addr(),
        database_url = %cfg.database_url,
        storage = ?cfg.storage,
        temp_dir = %cfg.upload.temp_dir.display(),
        "Starting video-ingest"
    );

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }
    db::run_migrations(&db)
        .await
        .context("applying database migrations")?;

    // --- Ensure local directories exist ---
    for dir in [&cfg.assets_dir, &cfg.upload.temp_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
            tracing::info!("Created directory at {}", dir.display());
        }
    }

    // --- Object storage backend ---
    let (storage, objects_dir) = match cfg.storage {
        StorageBackend::Local => {
            fs::create_dir_all(&cfg.object_dir)?;
            let public_base = format!("{}/objects", cfg.public_url);
            let local: Arc<dyn ObjectStorage> =
                Arc::new(LocalObjectStorage::new(cfg.object_dir.clone(), public_base));
            (local, Some(cfg.object_dir.clone()))
        }
        StorageBackend::S3 => {
            let location = S3Location {
                bucket: cfg.s3_bucket.clone().unwrap_or_default(),
                region: cfg.s3_region.clone(),
                endpoint_url: cfg.s3_endpoint.clone(),
            };
            tracing::info!(bucket = %location.bucket, region = %location.region, "Using S3 storage");
            let s3: Arc<dyn ObjectStorage> = Arc::new(S3ObjectStorage::new(location)?);
            (s3, None)
        }
    };

    // --- Initialize core services ---
    let videos: Arc<dyn VideoRepository> = Arc::new(SqliteVideoRepository::new(db.clone()));
    let uploads = VideoUploadService::new(
        videos.clone(),
        storage,
        Arc::new(FfprobeProber::new(cfg.ffprobe_path.clone())),
        Arc::new(FfmpegRemuxer::new(
            cfg.ffmpeg_path.clone(),
            cfg.upload.remux_suffix.clone(),
        )),
        Arc::new(OsKeySource),
        cfg.upload.clone(),
    );
    let thumbnails = ThumbnailService::new(
        videos.clone(),
        cfg.assets_dir.clone(),
        cfg.upload.temp_dir.clone(),
        cfg.public_url.clone(),
        cfg.upload.max_thumbnail_bytes,
    );

    let state = AppState {
        db,
        videos,
        auth: Arc::new(JwtPrincipalResolver::new(&cfg.jwt_secret)),
        uploads: Arc::new(uploads),
        thumbnails: Arc::new(thumbnails),
        temp_dir: cfg.upload.temp_dir.clone(),
    };

    // --- Build router ---
    let app = routes(
        state,
        StaticMounts {
            assets_dir: cfg.assets_dir.clone(),
            objects_dir,
        },
    );

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
