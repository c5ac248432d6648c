//! Test helpers: build AppState and router for integration tests.
//!
//! Media tools are replaced with in-process fakes so no ffmpeg install is
//! needed; storage is the local backend inside a temp dir.

#![allow(dead_code)]

use async_trait::async_trait;
use axum_test::{
    TestServer,
    multipart::{MultipartForm, Part},
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tempfile::TempDir;
use uuid::Uuid;
use video_ingest::{
    config::UploadSettings,
    media::{
        probe::{Geometry, ProbeError, Prober},
        remux::{RemuxError, Remuxer},
    },
    models::video::Video,
    routes::routes::{StaticMounts, routes},
    services::{
        auth::JwtPrincipalResolver,
        keys::OsKeySource,
        staging::TempArtifact,
        storage_service::LocalObjectStorage,
        thumbnail_service::ThumbnailService,
        upload_service::VideoUploadService,
        video_repository::{SqliteVideoRepository, VideoRepository},
    },
    state::AppState,
};

pub const TEST_JWT_SECRET: &str = "integration-test-secret";
pub const PUBLIC_URL: &str = "http://localhost:8091";

/// What the fake prober reports for the next upload.
pub type ProbeOutcome = Result<Geometry, String>;

pub struct FakeProber {
    next: Mutex<ProbeOutcome>,
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, path: &Path) -> Result<Geometry, ProbeError> {
        assert!(path.exists());
        self.next
            .lock()
            .unwrap()
            .clone()
            .map_err(|stderr| ProbeError::Exit {
                status: failed_status(),
                stderr,
            })
    }
}

#[cfg(unix)]
fn failed_status() -> std::process::ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    std::process::ExitStatus::from_raw(1 << 8)
}

/// Writes `<input>.processing` with a marker appended.
pub struct CopyRemuxer;

pub const REMUX_MARKER: &[u8] = b"|faststart";

#[async_trait]
impl Remuxer for CopyRemuxer {
    async fn remux(&self, input: &Path) -> Result<TempArtifact, RemuxError> {
        let mut out = input.as_os_str().to_owned();
        out.push(".processing");
        let artifact = TempArtifact::adopt(PathBuf::from(out));
        let mut data = tokio::fs::read(input).await.map_err(RemuxError::Spawn)?;
        data.extend_from_slice(REMUX_MARKER);
        tokio::fs::write(artifact.path(), data)
            .await
            .map_err(RemuxError::Spawn)?;
        Ok(artifact)
    }
}

/// Test application: server plus the owned resources it runs on.
pub struct TestApp {
    pub server: TestServer,
    pub repo: Arc<SqliteVideoRepository>,
    pub prober: Arc<FakeProber>,
    pub auth: JwtPrincipalResolver,
    pub temp_dir: TempDir,
    pub assets_dir: TempDir,
    pub objects_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        self.auth
            .issue(user_id, chrono::Duration::minutes(5))
            .unwrap()
    }

    pub fn bearer(&self, user_id: Uuid) -> String {
        format!("Bearer {}", self.token_for(user_id))
    }

    /// Insert a record owned by a fresh user.
    pub async fn seed_video(&self) -> Video {
        let video = Video::new(Uuid::new_v4(), "boots demo");
        self.repo.insert(&video).await.unwrap();
        video
    }

    pub async fn repo_video(&self, id: Uuid) -> Video {
        self.repo.get(id).await.unwrap()
    }

    pub fn set_probe(&self, outcome: ProbeOutcome) {
        *self.prober.next.lock().unwrap() = outcome;
    }

    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.temp_dir.path()).unwrap().count()
    }
}

pub fn landscape() -> ProbeOutcome {
    Ok(Geometry {
        width: 1920,
        height: 1080,
    })
}

pub fn video_form(bytes: &'static [u8], mime: &str) -> MultipartForm {
    let part = Part::bytes(bytes).file_name("boots.mp4").mime_type(mime);
    MultipartForm::new()
        .add_text("title", "ignored")
        .add_part("video", part)
}

pub fn thumbnail_form(bytes: &'static [u8], mime: &str) -> MultipartForm {
    let part = Part::bytes(bytes).file_name("thumb").mime_type(mime);
    MultipartForm::new().add_part("thumbnail", part)
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(UploadSettings::default()).await
}

/// Setup test app with an isolated in-memory DB and local storage.
pub async fn setup_test_app_with(settings: UploadSettings) -> TestApp {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    video_ingest::db::run_migrations(&pool).await.unwrap();
    let db = Arc::new(pool);

    let temp_dir = TempDir::new().unwrap();
    let assets_dir = TempDir::new().unwrap();
    let objects_dir = TempDir::new().unwrap();

    let repo = Arc::new(SqliteVideoRepository::new(db.clone()));
    let prober = Arc::new(FakeProber {
        next: Mutex::new(landscape()),
    });
    let storage = Arc::new(LocalObjectStorage::new(
        objects_dir.path(),
        format!("{}/objects", PUBLIC_URL),
    ));

    let settings = UploadSettings {
        temp_dir: temp_dir.path().to_path_buf(),
        ..settings
    };
    let uploads = VideoUploadService::new(
        repo.clone(),
        storage,
        prober.clone(),
        Arc::new(CopyRemuxer),
        Arc::new(OsKeySource),
        settings.clone(),
    );
    let thumbnails = ThumbnailService::new(
        repo.clone(),
        assets_dir.path(),
        temp_dir.path(),
        PUBLIC_URL,
        settings.max_thumbnail_bytes,
    );

    let state = AppState {
        db,
        videos: repo.clone(),
        auth: Arc::new(JwtPrincipalResolver::new(TEST_JWT_SECRET)),
        uploads: Arc::new(uploads),
        thumbnails: Arc::new(thumbnails),
        temp_dir: temp_dir.path().to_path_buf(),
    };

    let app = routes(
        state,
        StaticMounts {
            assets_dir: assets_dir.path().to_path_buf(),
            objects_dir: Some(objects_dir.path().to_path_buf()),
        },
    );
    let server = TestServer::new(app).unwrap();

    TestApp {
        server,
        repo,
        prober,
        auth: JwtPrincipalResolver::new(TEST_JWT_SECRET),
        temp_dir,
        assets_dir,
        objects_dir,
    }
}
