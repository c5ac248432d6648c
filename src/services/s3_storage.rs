//! S3 object storage via the `object_store` crate.

use crate::services::storage_service::{
    ObjectStorage, PutOutcome, StoreError, StoreResult, ensure_key_safe,
};
use async_trait::async_trait;
use futures::StreamExt;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore,
    aws::AmazonS3Builder,
    buffered::BufWriter,
    path::Path as ObjectPath,
};
use std::{path::Path, sync::Arc, time::Instant};
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;

/// Bytes buffered before the writer switches from one PUT to a multipart upload.
const DEFAULT_PART_SIZE: usize = 10 * 1024 * 1024;

/// Where an S3 bucket lives and how its objects are addressed publicly.
#[derive(Debug, Clone)]
pub struct S3Location {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible providers (MinIO, Spaces, ...).
    pub endpoint_url: Option<String>,
}

impl S3Location {
    /// `https://<bucket>.s3.<region>.amazonaws.com/<key>` for AWS, or
    /// path-style `<endpoint>/<bucket>/<key>` for a custom endpoint.
    pub fn object_url(&self, key: &str) -> String {
        match &self.endpoint_url {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.bucket,
                key
            ),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }
}

#[derive(Clone)]
pub struct S3ObjectStorage {
    store: Arc<dyn ObjectStore>,
    location: S3Location,
    part_size: usize,
}

impl S3ObjectStorage {
    /// Build from the ambient AWS environment (credentials, profile) plus the
    /// explicit bucket, region and endpoint.
    pub fn new(location: S3Location) -> StoreResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(location.region.clone())
            .with_bucket_name(location.bucket.clone());

        if let Some(endpoint) = &location.endpoint_url {
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder.build().map_err(|e| StoreError::Rejected {
            key: String::new(),
            reason: format!("invalid S3 configuration: {}", e),
        })?;

        Ok(Self::with_store(Arc::new(store), location))
    }

    /// Use an already configured store, e.g. an in-memory one.
    pub fn with_store(store: Arc<dyn ObjectStore>, location: S3Location) -> Self {
        Self {
            store,
            location,
            part_size: DEFAULT_PART_SIZE,
        }
    }

    pub fn with_part_size(self, part_size: usize) -> Self {
        Self { part_size, ..self }
    }
}

fn rejected(key: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Rejected {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

async fn write_chunks(writer: &mut BufWriter, source: &Path, key: &str) -> StoreResult<u64> {
    let mut chunks = ReaderStream::new(File::open(source).await?);
    let mut size_bytes: u64 = 0;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as u64;
        writer.put(chunk).await.map_err(|e| rejected(key, e))?;
    }
    Ok(size_bytes)
}

/// Feed `source` chunk by chunk into `writer` and complete the upload.
async fn stream_file(writer: &mut BufWriter, source: &Path, key: &str) -> StoreResult<u64> {
    let size_bytes = match write_chunks(writer, source, key).await {
        Ok(size_bytes) => size_bytes,
        Err(err) => {
            // Nothing is visible before shutdown; drop any parts already sent.
            if let Err(abort_err) = writer.abort().await {
                tracing::debug!(error = %abort_err, key = %key, "aborting S3 upload failed");
            }
            return Err(err);
        }
    };
    writer.shutdown().await.map_err(|e| rejected(key, e))?;
    Ok(size_bytes)
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    /// Streams the file; at most one part-sized buffer per request is held in
    /// memory. Small files go out as a single PUT, larger ones as multipart.
    async fn put_file(
        &self,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> StoreResult<PutOutcome> {
        ensure_key_safe(key)?;

        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );
        let mut writer =
            BufWriter::with_capacity(self.store.clone(), ObjectPath::from(key), self.part_size)
                .with_attributes(attributes);

        let start = Instant::now();
        let size_bytes = match stream_file(&mut writer, source, key).await {
            Ok(size_bytes) => size_bytes,
            Err(err) => {
                tracing::error!(
                    error = %err,
                    bucket = %self.location.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "S3 upload failed"
                );
                return Err(err);
            }
        };

        tracing::info!(
            bucket = %self.location.bucket,
            key = %key,
            size_bytes,
            duration_ms = start.elapsed().as_millis() as u64,
            "S3 upload successful"
        );

        Ok(PutOutcome {
            e_tag: None,
            size_bytes,
        })
    }

    fn url_for(&self, key: &str) -> String {
        self.location.object_url(key)
    }
}
