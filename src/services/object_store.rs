//! S3-compatible object store backend (Cloudflare R2, MinIO, AWS)

use crate::model::error::{S3Error, S3Result};
use crate::model::transfer_progress::TransferProgress;
use crate::settings::file_credentials::FileCredential;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::{ByteStream, SdkBody};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use aws_smithy_runtime_api::http::Request;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use bytes::Bytes;
use http_body::{Body, SizeHint};
use std::convert::Infallible;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::Sender;

/// Threshold above which multipart upload is used (100 MB)
const MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Minimum part size for multipart upload (5 MB - AWS minimum)
const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Default part size for multipart upload
const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Maximum number of parts allowed by S3
const MAX_PARTS: u64 = 10_000;

/// Upload side of an object store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the file at `local_path` under `key`, reporting bytes sent on `progress`
    async fn upload_file(
        &self,
        local_path: &Path,
        key: &str,
        progress: Sender<TransferProgress>,
    ) -> S3Result<()>;
}

struct ProgressTracker {
    bytes_written: u64,
    content_length: u64,
    progress_sender: Sender<TransferProgress>,
}

impl ProgressTracker {
    fn track(&mut self, len: u64) {
        self.bytes_written += len;
        let progress = TransferProgress {
            bytes_sent: self.bytes_written,
            total_bytes: self.content_length,
        };
        // Use try_send to avoid blocking transfers when channel is full
        let _ = self.progress_sender.try_send(progress);
    }
}

/// Request body wrapper that reports every chunk handed to the HTTP client
#[pin_project::pin_project]
pub struct ProgressBody<InnerBody> {
    #[pin]
    inner: InnerBody,
    // progress_tracker is a separate field, so it can be accessed as &mut.
    progress_tracker: ProgressTracker,
}

impl ProgressBody<SdkBody> {
    // SdkBody can be taken out of the request and rebuilt from our wrapper,
    // which lets us swap the body while customizing the operation.
    pub fn replace(
        value: Request<SdkBody>,
        tx: Sender<TransferProgress>,
    ) -> Result<Request<SdkBody>, Infallible> {
        let value = value.map(|body| {
            let len = body.content_length().unwrap_or(0);
            let body = ProgressBody::new(body, len, tx.clone());
            SdkBody::from_body_0_4(body)
        });
        Ok(value)
    }
}

impl<InnerBody> ProgressBody<InnerBody>
where
    InnerBody: Body<Data = Bytes, Error = aws_smithy_types::body::Error>,
{
    pub fn new(body: InnerBody, content_length: u64, tx: Sender<TransferProgress>) -> Self {
        Self {
            inner: body,
            progress_tracker: ProgressTracker {
                bytes_written: 0,
                content_length,
                progress_sender: tx,
            },
        }
    }
}

impl<InnerBody> Body for ProgressBody<InnerBody>
where
    InnerBody: Body<Data = Bytes, Error = aws_smithy_types::body::Error>,
{
    type Data = Bytes;

    type Error = aws_smithy_types::body::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        let this = self.project();
        match this.inner.poll_data(cx) {
            Poll::Ready(Some(Ok(data))) => {
                this.progress_tracker.track(data.len() as u64);
                Poll::Ready(Some(Ok(data)))
            }
            other => other,
        }
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<http::HeaderMap>, Self::Error>> {
        self.project().inner.poll_trailers(cx)
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.progress_tracker.content_length)
    }
}

/// Object store backed by the AWS SDK
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(creds: &FileCredential, bucket: impl Into<String>) -> Self {
        let credentials = Credentials::new(
            creds.access_key.clone(),
            creds.secret_key.clone(),
            None,
            None,
            "modelsync-credentials",
        );
        let region_provider =
            RegionProviderChain::first_try(Region::new(creds.default_region.clone()))
                .or_default_provider()
                .or_else(Region::new("auto"));
        let shared_config = aws_config::from_env()
            .credentials_provider(credentials)
            .region(region_provider)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config)
            .force_path_style(creds.force_path_style);
        if let Some(endpoint) = &creds.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        tracing::debug!(
            "object store client for {} (endpoint: {:?})",
            creds.name,
            creds.endpoint_url
        );

        S3ObjectStore {
            client: Client::from_conf(builder.build()),
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl S3ObjectStore {
    fn should_use_multipart(file_size: u64) -> bool {
        file_size >= MULTIPART_THRESHOLD
    }

    /// Part size that stays above the S3 minimum and below the part count limit
    fn calculate_part_size(file_size: u64) -> u64 {
        let mut part_size = DEFAULT_PART_SIZE;
        if file_size.div_ceil(part_size) > MAX_PARTS {
            part_size = file_size.div_ceil(MAX_PARTS);
            // Round up to next MB for cleaner sizes
            part_size = part_size.div_ceil(1024 * 1024) * (1024 * 1024);
        }
        part_size.max(MIN_PART_SIZE)
    }

    async fn upload_simple(
        &self,
        local_path: &Path,
        key: &str,
        progress: Sender<TransferProgress>,
    ) -> S3Result<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| S3Error::Other(format!("{}: {}", local_path.display(), e)))?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body);
        let customized = request
            .customize()
            .map_request(move |req| ProgressBody::<SdkBody>::replace(req, progress.clone()));

        match customized.send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!("Upload SdkError: {:?}", e);
                Err(classify(e.into_service_error()))
            }
        }
    }

    /// Upload in parts, aborting the multipart upload if any step fails
    async fn upload_multipart(
        &self,
        local_path: &Path,
        key: &str,
        file_size: u64,
        progress: Sender<TransferProgress>,
    ) -> S3Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to initiate multipart upload: {:?}", e);
                classify(e.into_service_error())
            })?;
        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| S3Error::Other("No upload ID returned from create_multipart_upload".into()))?
            .to_string();

        let outcome = self
            .upload_parts(local_path, key, &upload_id, file_size, &progress)
            .await;
        if outcome.is_err() {
            let _ = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await;
        }
        outcome
    }

    async fn upload_parts(
        &self,
        local_path: &Path,
        key: &str,
        upload_id: &str,
        file_size: u64,
        progress: &Sender<TransferProgress>,
    ) -> S3Result<()> {
        let part_size = Self::calculate_part_size(file_size);
        let total_parts = file_size.div_ceil(part_size);
        let mut file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| S3Error::Other(format!("{}: {}", local_path.display(), e)))?;
        let mut completed_parts = Vec::new();
        let mut part_number: i32 = 1;
        let mut bytes_uploaded: u64 = 0;

        loop {
            // async read() can return partial data, fill the whole part
            let mut buffer = vec![0u8; part_size as usize];
            let mut bytes_read = 0;
            while bytes_read < buffer.len() {
                match file
                    .read(&mut buffer[bytes_read..])
                    .await
                    .map_err(|e| S3Error::Other(format!("{}: {}", local_path.display(), e)))?
                {
                    0 => break,
                    n => bytes_read += n,
                }
            }
            if bytes_read == 0 {
                break;
            }
            buffer.truncate(bytes_read);
            tracing::debug!("Uploading part {}/{} of {}", part_number, total_parts, key);

            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buffer))
                .send()
                .await
                .map_err(|e| {
                    let error = classify(e.into_service_error());
                    tracing::error!("part {} of {} failed: {}", part_number, key, error);
                    error
                })?;
            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
            bytes_uploaded += bytes_read as u64;
            let _ = progress.try_send(TransferProgress {
                bytes_sent: bytes_uploaded,
                total_bytes: file_size,
            });
            part_number += 1;
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to complete multipart upload: {:?}", e);
                classify(e.into_service_error())
            })?;
        tracing::info!("Multipart upload of {} completed ({} parts)", key, part_number - 1);
        Ok(())
    }
}

fn classify<E>(service_error: E) -> S3Error
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    let message = match service_error.code() {
        Some(code) => format!("{}: {}", code, service_error),
        None => service_error.to_string(),
    };
    S3Error::from_message(message)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload_file(
        &self,
        local_path: &Path,
        key: &str,
        progress: Sender<TransferProgress>,
    ) -> S3Result<()> {
        let file_size = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| S3Error::Other(format!("{}: {}", local_path.display(), e)))?
            .len();

        tracing::debug!("putting {} into {}/{}", local_path.display(), self.bucket, key);
        if Self::should_use_multipart(file_size) {
            self.upload_multipart(local_path, key, file_size, progress).await
        } else {
            self.upload_simple(local_path, key, progress).await
        }
    }
}
