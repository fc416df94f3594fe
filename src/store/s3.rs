use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::{BlobProperties, BlobReader, BlobSink, BlobStore, StoreError, StoreResult};
use crate::config::Settings;

/// Size of each multipart upload part. S3 requires at least 5 MiB for every
/// part but the last.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Object store backed by a single S3 bucket
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Build a client from the default AWS configuration chain plus the
    /// endpoint and region overrides in `settings`
    pub async fn connect(settings: &Settings) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &settings.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }

        let base_config = loader.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&base_config);

        if let Some(endpoint) = &settings.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if settings.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());
        Self::from_client(client, settings.bucket.clone())
    }

    /// Wrap an already configured client (useful for testing)
    pub fn from_client(client: Client, bucket: String) -> Self {
        S3BlobStore { client, bucket }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn properties(&self, id: &str) -> StoreResult<BlobProperties> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(id)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    StoreError::NotFound { id: id.to_string() }
                } else {
                    StoreError::request("head_object", id, e)
                }
            })?;

        Ok(BlobProperties {
            length: resp.content_length().unwrap_or(0).max(0) as u64,
            content_type: resp.content_type().map(String::from),
        })
    }

    async fn open_read(&self, id: &str) -> StoreResult<BlobReader> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(id)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StoreError::NotFound { id: id.to_string() }
                } else {
                    StoreError::request("get_object", id, e)
                }
            })?;

        let key = id.to_string();
        let stream = ReaderStream::new(resp.body.into_async_read()).map_err(move |source| {
            StoreError::Io {
                id: key.clone(),
                source,
            }
        });

        Ok(stream.boxed())
    }

    async fn open_write(&self, id: &str, content_type: &str) -> StoreResult<Box<dyn BlobSink>> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(id)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StoreError::request("create_multipart_upload", id, e))?;

        let upload_id = resp
            .upload_id()
            .map(String::from)
            .ok_or_else(|| StoreError::Rejected {
                id: id.to_string(),
                reason: "multipart upload was created without an upload id".to_string(),
            })?;

        debug!(key = id, upload_id = %upload_id, "opened multipart upload");

        Ok(Box::new(S3MultipartSink {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: id.to_string(),
            upload_id,
            buffer: BytesMut::with_capacity(PART_SIZE),
            parts: Vec::new(),
            done: false,
        }))
    }

    async fn delete_if_exists(&self, id: &str) -> StoreResult<bool> {
        match self.properties(id).await {
            Ok(_) => {}
            Err(StoreError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(id)
            .send()
            .await
            .map_err(|e| StoreError::request("delete_object", id, e))?;

        Ok(true)
    }
}

/// Sink writing an object through an S3 multipart upload.
///
/// Holds at most one part in memory. The object only appears in the bucket
/// once `close` completes the upload.
struct S3MultipartSink {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    buffer: BytesMut,
    parts: Vec<CompletedPart>,
    done: bool,
}

impl S3MultipartSink {
    async fn upload_part(&mut self, body: Bytes) -> StoreResult<()> {
        let part_number = self.parts.len() as i32 + 1;

        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StoreError::request("upload_part", &self.key, e))?;

        self.parts.push(
            CompletedPart::builder()
                .set_e_tag(resp.e_tag().map(String::from))
                .part_number(part_number)
                .build(),
        );

        Ok(())
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.done {
            return Err(StoreError::Rejected {
                id: self.key.clone(),
                reason: "multipart upload is already finished".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BlobSink for S3MultipartSink {
    async fn write(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.ensure_open()?;
        self.buffer.extend_from_slice(&chunk);

        while self.buffer.len() >= PART_SIZE {
            let part = self.buffer.split_to(PART_SIZE).freeze();
            self.upload_part(part).await?;
        }

        Ok(())
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.ensure_open()?;

        if !self.buffer.is_empty() || self.parts.is_empty() {
            let last = self.buffer.split().freeze();
            self.upload_part(last).await?;
        }

        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(std::mem::take(&mut self.parts)))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|e| StoreError::request("complete_multipart_upload", &self.key, e))?;

        self.done = true;
        Ok(())
    }

    async fn abort(&mut self) -> StoreResult<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        self.buffer.clear();

        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
            .map_err(|e| StoreError::request("abort_multipart_upload", &self.key, e))?;

        Ok(())
    }
}

impl Drop for S3MultipartSink {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        // Dropped mid-upload: release the parts in the background
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, upload_id = %self.upload_id, "multipart upload left open");
            return;
        };

        let client = self.client.clone();
        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);

        handle.spawn(async move {
            let result = client
                .abort_multipart_upload()
                .bucket(&bucket)
                .key(&key)
                .upload_id(&upload_id)
                .send()
                .await;
            if let Err(e) = result {
                warn!(key = %key, upload_id = %upload_id, error = %e, "failed to abort multipart upload");
            }
        });
    }
}
