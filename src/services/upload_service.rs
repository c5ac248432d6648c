//! The video upload pipeline.
//!
//! `handle_upload` runs, strictly in order:
//!
//! 1. fetch the record, 2. check ownership, 3. validate the declared media
//! type, 4. stage the body to a temp file, 5. probe and classify, 6. remux
//! for fast start, 7. upload under a fresh key, 8. persist the new URL.
//!
//! Nothing touches disk, spawns a process or talks to the object store before
//! step 2 has passed. Every temp file is owned by a [`TempArtifact`] guard, so
//! all of them are gone by the time the call returns or its future is
//! dropped, whatever step stopped the pipeline.

use crate::{
    config::UploadSettings,
    errors::UploadError,
    media::{
        probe::{AspectClass, Prober},
        remux::Remuxer,
    },
    models::video::Video,
    services::{
        keys::{self, KeySource},
        staging::{self, TempArtifact},
        storage_service::ObjectStorage,
        video_repository::{RepoError, VideoRepository},
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use std::sync::Arc;
use uuid::Uuid;

pub struct VideoUploadService {
    videos: Arc<dyn VideoRepository>,
    storage: Arc<dyn ObjectStorage>,
    prober: Arc<dyn Prober>,
    remuxer: Arc<dyn Remuxer>,
    keys: Arc<dyn KeySource>,
    settings: UploadSettings,
}

impl VideoUploadService {
    pub fn new(
        videos: Arc<dyn VideoRepository>,
        storage: Arc<dyn ObjectStorage>,
        prober: Arc<dyn Prober>,
        remuxer: Arc<dyn Remuxer>,
        keys: Arc<dyn KeySource>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            videos,
            storage,
            prober,
            remuxer,
            keys,
            settings,
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Store a new video for `video_id` on behalf of `principal`.
    ///
    /// `body` is drained at most once. On success the returned record carries
    /// the new `video_url`; the object it replaced, if any, stays in storage.
    #[tracing::instrument(skip(self, body), fields(video_id = %video_id, user_id = %principal))]
    pub async fn handle_upload<S, E>(
        &self,
        video_id: Uuid,
        principal: Uuid,
        body: S,
        declared_content_type: Option<&str>,
    ) -> Result<Video, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<UploadError>,
    {
        let mut video = authorize(self.videos.as_ref(), video_id, principal).await?;
        let media_type = self.validate_media_type(declared_content_type)?;

        let (staged, bytes) = staging::stage_body(
            body,
            &self.settings.temp_dir,
            &self.settings.temp_prefix,
            &self.settings.file_extension,
            self.settings.max_upload_bytes,
        )
        .await?;
        tracing::info!(bytes, "upload staged");

        let geometry = self.prober.probe(staged.path()).await?;
        let aspect = AspectClass::classify(geometry, self.settings.aspect_tolerance);
        tracing::info!(
            width = geometry.width,
            height = geometry.height,
            aspect = %aspect,
            "video classified"
        );

        let remuxed: TempArtifact = self.remuxer.remux(staged.path()).await?;
        // The raw upload is no longer needed once the fast-start copy exists.
        drop(staged);

        let key = keys::storage_key(
            self.keys.as_ref(),
            aspect,
            self.settings.key_bytes,
            &self.settings.file_extension,
        )?;

        let outcome = self
            .storage
            .put_file(&key, remuxed.path(), &media_type)
            .await
            .map_err(UploadError::Upload)?;
        drop(remuxed);

        let url = self.storage.url_for(&key);
        tracing::info!(key = %key, size_bytes = outcome.size_bytes, "video stored");

        video.video_url = Some(url);
        video.updated_at = Utc::now();
        if let Err(err) = self.videos.update(&video).await {
            tracing::warn!(
                key = %key,
                error = %err,
                "video stored but record update failed; object is orphaned"
            );
            return Err(UploadError::RecordPersist(err));
        }

        Ok(video)
    }

    /// Returns the normalized media type when it matches the accepted one.
    fn validate_media_type(&self, declared: Option<&str>) -> Result<String, UploadError> {
        let raw = declared
            .ok_or_else(|| UploadError::MalformedRequest("missing content type".into()))?;
        let parsed: mime::Mime = raw
            .parse()
            .map_err(|_| UploadError::MalformedRequest(format!("invalid content type `{}`", raw)))?;

        let essence = parsed.essence_str();
        if !essence.eq_ignore_ascii_case(&self.settings.video_mime) {
            return Err(UploadError::UnsupportedMediaType(essence.to_string()));
        }
        Ok(self.settings.video_mime.clone())
    }
}

/// Load `video_id` and make sure `principal` owns it.
pub async fn authorize(
    videos: &dyn VideoRepository,
    video_id: Uuid,
    principal: Uuid,
) -> Result<Video, UploadError> {
    let video = videos.get(video_id).await.map_err(|err| match err {
        RepoError::NotFound(id) => UploadError::NotFound(id),
        other => UploadError::RecordLookup(other),
    })?;

    if !video.is_owned_by(principal) {
        return Err(UploadError::Forbidden {
            video_id,
            principal,
        });
    }
    Ok(video)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        media::{
            probe::{Geometry, ProbeError},
            remux::RemuxError,
        },
        services::{
            keys::{KeyError, OsKeySource},
            storage_service::{PutOutcome, StoreError, StoreResult},
            video_repository::RepoResult,
        },
    };
    use async_trait::async_trait;
    use futures::{StreamExt, stream};
    use std::{
        collections::HashMap,
        io,
        path::{Path, PathBuf},
        process::ExitStatus,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };
    use tempfile::{TempDir, tempdir};

    #[derive(Default)]
    struct FakeVideos {
        records: Mutex<HashMap<Uuid, Video>>,
        updates: AtomicUsize,
        fail_update: bool,
    }

    #[async_trait]
    impl VideoRepository for FakeVideos {
        async fn get(&self, id: Uuid) -> RepoResult<Video> {
            self.records
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(RepoError::NotFound(id))
        }

        async fn update(&self, video: &Video) -> RepoResult<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            if self.fail_update {
                return Err(RepoError::Sqlx(sqlx::Error::PoolClosed));
            }
            self.records
                .lock()
                .unwrap()
                .insert(video.id, video.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeStorage {
        puts: Mutex<Vec<(String, Vec<u8>, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl ObjectStorage for FakeStorage {
        async fn put_file(
            &self,
            key: &str,
            source: &Path,
            content_type: &str,
        ) -> StoreResult<PutOutcome> {
            if self.fail {
                return Err(StoreError::Rejected {
                    key: key.to_string(),
                    reason: "503 Slow Down".into(),
                });
            }
            let data = std::fs::read(source)?;
            let size_bytes = data.len() as u64;
            self.puts
                .lock()
                .unwrap()
                .push((key.to_string(), data, content_type.to_string()));
            Ok(PutOutcome {
                e_tag: None,
                size_bytes,
            })
        }

        fn url_for(&self, key: &str) -> String {
            format!("https://tubes.s3.us-east-2.amazonaws.com/{}", key)
        }
    }

    struct FakeProber {
        result: fn() -> Result<Geometry, ProbeError>,
        calls: AtomicUsize,
        seen: Mutex<Vec<PathBuf>>,
    }

    impl FakeProber {
        fn new(result: fn() -> Result<Geometry, ProbeError>) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, path: &Path) -> Result<Geometry, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(path.exists(), "probe must see the staged file");
            self.seen.lock().unwrap().push(path.to_path_buf());
            (self.result)()
        }
    }

    /// Copies input to `<input>.processing`, optionally failing after writing.
    struct FakeRemuxer {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Remuxer for FakeRemuxer {
        async fn remux(&self, input: &Path) -> Result<TempArtifact, RemuxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = input.as_os_str().to_owned();
            out.push(".processing");
            let artifact = TempArtifact::adopt(PathBuf::from(out));
            let mut data = std::fs::read(input).map_err(RemuxError::Spawn)?;
            data.extend_from_slice(b"+faststart");
            std::fs::write(artifact.path(), data).map_err(RemuxError::Spawn)?;
            if self.fail {
                return Err(RemuxError::Exit {
                    status: exit_status(1),
                    stderr: "moov atom not found".into(),
                });
            }
            Ok(artifact)
        }
    }

    struct DeadKeys;

    impl KeySource for DeadKeys {
        fn fill(&self, _buf: &mut [u8]) -> Result<(), KeyError> {
            Err(KeyError::Entropy("no entropy".into()))
        }
    }

    #[cfg(unix)]
    fn exit_status(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    fn landscape() -> Result<Geometry, ProbeError> {
        Ok(Geometry {
            width: 1920,
            height: 1080,
        })
    }

    fn portrait() -> Result<Geometry, ProbeError> {
        Ok(Geometry {
            width: 1080,
            height: 1920,
        })
    }

    fn no_streams() -> Result<Geometry, ProbeError> {
        Err(ProbeError::NoStreamFound)
    }

    fn probe_crash() -> Result<Geometry, ProbeError> {
        Err(ProbeError::Exit {
            status: exit_status(1),
            stderr: "Invalid data found when processing input".into(),
        })
    }

    struct Harness {
        service: VideoUploadService,
        videos: Arc<FakeVideos>,
        storage: Arc<FakeStorage>,
        prober: Arc<FakeProber>,
        remuxer: Arc<FakeRemuxer>,
        temp: TempDir,
        owner: Uuid,
        video_id: Uuid,
    }

    struct Knobs {
        probe: fn() -> Result<Geometry, ProbeError>,
        remux_fails: bool,
        keys_fail: bool,
        store_fails: bool,
        update_fails: bool,
        max_upload_bytes: u64,
    }

    impl Default for Knobs {
        fn default() -> Self {
            Self {
                probe: landscape,
                remux_fails: false,
                keys_fail: false,
                store_fails: false,
                update_fails: false,
                max_upload_bytes: 1 << 20,
            }
        }
    }

    fn harness(knobs: Knobs) -> Harness {
        let temp = tempdir().unwrap();
        let owner = Uuid::new_v4();
        let video = Video::new(owner, "clip");
        let video_id = video.id;

        let videos = Arc::new(FakeVideos {
            fail_update: knobs.update_fails,
            ..Default::default()
        });
        videos.records.lock().unwrap().insert(video.id, video);
        let storage = Arc::new(FakeStorage {
            fail: knobs.store_fails,
            ..Default::default()
        });
        let prober = Arc::new(FakeProber::new(knobs.probe));
        let remuxer = Arc::new(FakeRemuxer {
            fail: knobs.remux_fails,
            calls: AtomicUsize::new(0),
        });
        let keys: Arc<dyn KeySource> = if knobs.keys_fail {
            Arc::new(DeadKeys)
        } else {
            Arc::new(OsKeySource)
        };

        let settings = UploadSettings {
            temp_dir: temp.path().to_path_buf(),
            max_upload_bytes: knobs.max_upload_bytes,
            ..UploadSettings::default()
        };

        let service = VideoUploadService::new(
            videos.clone(),
            storage.clone(),
            prober.clone(),
            remuxer.clone(),
            keys,
            settings,
        );

        Harness {
            service,
            videos,
            storage,
            prober,
            remuxer,
            temp,
            owner,
            video_id,
        }
    }

    fn body(data: &'static [u8]) -> impl Stream<Item = Result<Bytes, UploadError>> {
        stream::iter(vec![Ok(Bytes::from_static(data))])
    }

    fn temp_entries(h: &Harness) -> usize {
        std::fs::read_dir(h.temp.path()).unwrap().count()
    }

    fn stored_url(h: &Harness) -> Option<String> {
        h.videos
            .records
            .lock()
            .unwrap()
            .get(&h.video_id)
            .and_then(|v| v.video_url.clone())
    }

    impl Harness {
        async fn upload(&self, principal: Uuid) -> Result<Video, UploadError> {
            self.service
                .handle_upload(self.video_id, principal, body(b"mp4 bytes"), Some("video/mp4"))
                .await
        }
    }

    #[tokio::test]
    async fn landscape_upload_stores_remuxed_bytes_and_updates_record() {
        let h = harness(Knobs::default());

        let video = h.upload(h.owner).await.unwrap();

        let url = video.video_url.clone().unwrap();
        let key = url
            .strip_prefix("https://tubes.s3.us-east-2.amazonaws.com/")
            .unwrap();
        let id = key
            .strip_prefix("landscape/")
            .and_then(|rest| rest.strip_suffix(".mp4"))
            .unwrap();
        assert_eq!(id.len(), 43);

        let puts = h.storage.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].0, key);
        assert_eq!(puts[0].1, b"mp4 bytes+faststart");
        assert_eq!(puts[0].2, "video/mp4");
        drop(puts);

        assert_eq!(h.videos.updates.load(Ordering::SeqCst), 1);
        assert_eq!(stored_url(&h), Some(url));
        assert_eq!(temp_entries(&h), 0);
    }

    #[tokio::test]
    async fn portrait_upload_uses_portrait_namespace() {
        let h = harness(Knobs {
            probe: portrait,
            ..Knobs::default()
        });
        let video = h.upload(h.owner).await.unwrap();
        assert!(
            video
                .video_url
                .unwrap()
                .starts_with("https://tubes.s3.us-east-2.amazonaws.com/portrait/")
        );
    }

    #[tokio::test]
    async fn non_owner_causes_no_side_effects() {
        let h = harness(Knobs::default());

        let err = h.upload(Uuid::new_v4()).await.unwrap_err();

        assert!(matches!(err, UploadError::Forbidden { .. }));
        assert_eq!(h.prober.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.remuxer.calls.load(Ordering::SeqCst), 0);
        assert!(h.storage.puts.lock().unwrap().is_empty());
        assert_eq!(h.videos.updates.load(Ordering::SeqCst), 0);
        assert_eq!(temp_entries(&h), 0);
    }

    #[tokio::test]
    async fn unknown_record_is_not_found() {
        let h = harness(Knobs::default());
        let err = h
            .service
            .handle_upload(Uuid::new_v4(), h.owner, body(b"x"), Some("video/mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::NotFound(_)));
        assert_eq!(temp_entries(&h), 0);
    }

    #[tokio::test]
    async fn wrong_media_type_is_rejected_before_staging() {
        let h = harness(Knobs::default());
        let err = h
            .service
            .handle_upload(h.video_id, h.owner, body(b"x"), Some("image/png"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedMediaType(ref t) if t == "image/png"));
        assert_eq!(temp_entries(&h), 0);
        assert_eq!(h.prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn media_type_parameters_and_case_are_ignored() {
        let h = harness(Knobs::default());
        h.service
            .handle_upload(h.video_id, h.owner, body(b"x"), Some("Video/MP4; codecs=avc1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_or_garbled_content_type_is_malformed() {
        let h = harness(Knobs::default());
        for declared in [None, Some("not a mime")] {
            let err = h
                .service
                .handle_upload(h.video_id, h.owner, body(b"x"), declared)
                .await
                .unwrap_err();
            assert!(matches!(err, UploadError::MalformedRequest(_)));
        }
    }

    #[tokio::test]
    async fn oversized_body_fails_staging_without_leftovers() {
        let h = harness(Knobs {
            max_upload_bytes: 4,
            ..Knobs::default()
        });
        let err = h.upload(h.owner).await.unwrap_err();
        assert!(matches!(err, UploadError::PayloadTooLarge(_)));
        assert_eq!(h.prober.calls.load(Ordering::SeqCst), 0);
        assert_eq!(temp_entries(&h), 0);
    }

    #[tokio::test]
    async fn body_error_fails_staging_without_leftovers() {
        let h = harness(Knobs::default());
        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"half")),
            Err(UploadError::Staging(io::Error::other("reset by peer"))),
        ]);
        let err = h
            .service
            .handle_upload(h.video_id, h.owner, broken, Some("video/mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Staging(_)));
        assert_eq!(temp_entries(&h), 0);
        assert_eq!(h.prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn probe_failure_aborts_before_remux_and_upload() {
        let h = harness(Knobs {
            probe: probe_crash,
            ..Knobs::default()
        });
        let err = h.upload(h.owner).await.unwrap_err();

        assert!(matches!(err, UploadError::Probe(ProbeError::Exit { .. })));
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        // the staged file existed while probing and is gone now
        let seen = h.prober.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].exists());
        assert_eq!(h.remuxer.calls.load(Ordering::SeqCst), 0);
        assert!(h.storage.puts.lock().unwrap().is_empty());
        assert_eq!(stored_url(&h), None);
        assert_eq!(temp_entries(&h), 0);
    }

    #[tokio::test]
    async fn no_stream_found_aborts_before_remux_and_upload() {
        let h = harness(Knobs {
            probe: no_streams,
            ..Knobs::default()
        });
        let err = h.upload(h.owner).await.unwrap_err();
        assert!(matches!(err, UploadError::Probe(ProbeError::NoStreamFound)));
        assert_eq!(h.remuxer.calls.load(Ordering::SeqCst), 0);
        assert!(h.storage.puts.lock().unwrap().is_empty());
        assert_eq!(temp_entries(&h), 0);
    }

    #[tokio::test]
    async fn remux_failure_removes_both_artifacts() {
        let h = harness(Knobs {
            remux_fails: true,
            ..Knobs::default()
        });
        let err = h.upload(h.owner).await.unwrap_err();
        assert!(matches!(err, UploadError::Remux(_)));
        assert!(h.storage.puts.lock().unwrap().is_empty());
        assert_eq!(h.videos.updates.load(Ordering::SeqCst), 0);
        assert_eq!(temp_entries(&h), 0);
    }

    #[tokio::test]
    async fn key_generation_failure_aborts_upload() {
        let h = harness(Knobs {
            keys_fail: true,
            ..Knobs::default()
        });
        let err = h.upload(h.owner).await.unwrap_err();
        assert!(matches!(err, UploadError::KeyGeneration(_)));
        assert!(h.storage.puts.lock().unwrap().is_empty());
        assert_eq!(temp_entries(&h), 0);
    }

    #[tokio::test]
    async fn store_failure_leaves_record_untouched() {
        let h = harness(Knobs {
            store_fails: true,
            ..Knobs::default()
        });
        let err = h.upload(h.owner).await.unwrap_err();
        assert!(matches!(err, UploadError::Upload(_)));
        assert_eq!(h.videos.updates.load(Ordering::SeqCst), 0);
        assert_eq!(stored_url(&h), None);
        assert_eq!(temp_entries(&h), 0);
    }

    #[tokio::test]
    async fn persist_failure_keeps_uploaded_object() {
        let h = harness(Knobs {
            update_fails: true,
            ..Knobs::default()
        });
        let err = h.upload(h.owner).await.unwrap_err();
        assert!(matches!(err, UploadError::RecordPersist(_)));
        // no compensating delete
        assert_eq!(h.storage.puts.lock().unwrap().len(), 1);
        assert_eq!(h.videos.updates.load(Ordering::SeqCst), 1);
        assert_eq!(temp_entries(&h), 0);
    }

    #[tokio::test]
    async fn reupload_overwrites_reference_once() {
        let h = harness(Knobs::default());
        let first = h.upload(h.owner).await.unwrap().video_url.unwrap();
        let second = h.upload(h.owner).await.unwrap().video_url.unwrap();

        assert_ne!(first, second);
        assert_eq!(stored_url(&h), Some(second));
        assert_eq!(h.videos.updates.load(Ordering::SeqCst), 2);
        // both objects remain in the store
        assert_eq!(h.storage.puts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dropped_request_future_cleans_up() {
        let h = harness(Knobs::default());
        // A body that yields one chunk then never finishes.
        let endless = stream::iter(vec![Ok::<_, UploadError>(Bytes::from_static(b"abc"))])
            .chain(stream::pending());

        let fut = h
            .service
            .handle_upload(h.video_id, h.owner, endless, Some("video/mp4"));
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(50), fut).await;
        assert!(timed_out.is_err());

        assert_eq!(temp_entries(&h), 0);
        assert!(h.storage.puts.lock().unwrap().is_empty());
    }
}
