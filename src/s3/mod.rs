//! S3 Client module
//!
//! [`StorageClient`] implementation over the AWS SDK.
//!
//! # Tracing
//!
//! Every operation runs inside a span:
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | HeadBucket | `s3.head_bucket` | bucket, exists |
//! | HeadObject | `s3.head_object` | bucket, key, exists |
//! | CreateMultipartUpload | `s3.create_multipart_upload` | bucket, key, upload_id |
//! | UploadPart | `s3.upload_part` | bucket, upload_id, part_number, bytes, etag |
//! | CompleteMultipartUpload | `s3.complete_multipart_upload` | bucket, upload_id, parts_count, etag |
//! | AbortMultipartUpload | `s3.abort_multipart_upload` | bucket, upload_id |
//! | PutObject | `s3.put_object` | bucket, key, bytes, etag |
//!
//! # Example
//!
//! ```no_run
//! use s3_mp_upload::config::S3Config;
//! use s3_mp_upload::s3::S3Client;
//! use s3_mp_upload::storage::StorageClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = S3Client::new(&S3Config {
//!     endpoint: Some("http://localhost:9000".into()),
//!     access_key: Some("minioadmin".into()),
//!     secret_key: Some("minioadmin".into()),
//!     ..S3Config::default()
//! })
//! .await?;
//!
//! assert!(client.container_exists("uploads").await?);
//! # Ok(())
//! # }
//! ```

use crate::config::S3Config;
use crate::storage::{CompletedPart, MultipartSession, StorageClient, StorageError};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use bytes::Bytes;
use std::time::Duration;

/// Region used when neither configuration nor environment provides one
pub const FALLBACK_REGION: &str = "us-east-1";

/// S3 Client
#[derive(Debug, Clone)]
pub struct S3Client {
    inner: aws_sdk_s3::Client,
}

impl S3Client {
    /// Build a client from configuration.
    ///
    /// Static credentials are used when configured; otherwise the AWS
    /// default credential chain applies.
    pub async fn new(config: &S3Config) -> Result<Self, StorageError> {
        let region = RegionProviderChain::first_try(config.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(FALLBACK_REGION));

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .retry_config(RetryConfig::standard().with_max_attempts(config.sdk_max_attempts));

        if let Some(ref profile) = config.profile {
            loader = loader.profile_name(profile);
        }

        if let Some(seconds) = config.timeout_seconds {
            loader = loader.timeout_config(
                TimeoutConfig::builder()
                    .operation_attempt_timeout(Duration::from_secs(seconds))
                    .build(),
            );
        }

        match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                    access_key,
                    secret_key,
                    config.session_token.clone(),
                    None,
                    "s3-mp-upload-config",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(StorageError::ConfigError(
                    "access_key and secret_key must be configured together".into(),
                ))
            }
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style || config.endpoint.is_some());

        if let Some(ref endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self::from_sdk(aws_sdk_s3::Client::from_conf(builder.build())))
    }

    /// Wrap an existing SDK client
    pub fn from_sdk(inner: aws_sdk_s3::Client) -> Self {
        Self { inner }
    }

    /// Get the underlying SDK client
    pub fn sdk(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }
}

fn sdk_part_number(part_number: u32) -> Result<i32, StorageError> {
    i32::try_from(part_number).map_err(|_| StorageError::InvalidPartNumber(part_number))
}

#[async_trait]
impl StorageClient for S3Client {
    #[tracing::instrument(
        name = "s3.head_bucket",
        skip(self),
        fields(s3.bucket = %container, s3.exists = tracing::field::Empty),
        err
    )]
    async fn container_exists(&self, container: &str) -> Result<bool, StorageError> {
        let exists = match self.inner.head_bucket().bucket(container).send().await {
            Ok(_) => true,
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    false
                } else {
                    return Err(StorageError::service(
                        "HeadBucket",
                        DisplayErrorContext(&e).to_string(),
                    ));
                }
            }
        };

        tracing::Span::current().record("s3.exists", exists);
        Ok(exists)
    }

    #[tracing::instrument(
        name = "s3.head_object",
        skip(self),
        fields(s3.bucket = %container, s3.key = %key, s3.exists = tracing::field::Empty),
        err
    )]
    async fn object_exists(&self, container: &str, key: &str) -> Result<bool, StorageError> {
        let exists = match self
            .inner
            .head_object()
            .bucket(container)
            .key(key)
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    false
                } else {
                    return Err(StorageError::service(
                        "HeadObject",
                        DisplayErrorContext(&e).to_string(),
                    ));
                }
            }
        };

        tracing::Span::current().record("s3.exists", exists);
        Ok(exists)
    }

    #[tracing::instrument(
        name = "s3.create_multipart_upload",
        skip(self),
        fields(
            s3.bucket = %container,
            s3.key = %key,
            s3.upload_id = tracing::field::Empty
        ),
        err
    )]
    async fn create_multipart_session(
        &self,
        container: &str,
        key: &str,
    ) -> Result<MultipartSession, StorageError> {
        let output = self
            .inner
            .create_multipart_upload()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                StorageError::service("CreateMultipartUpload", DisplayErrorContext(&e).to_string())
            })?;

        let upload_id = output
            .upload_id()
            .ok_or(StorageError::MissingField {
                operation: "CreateMultipartUpload",
                field: "UploadId",
            })?
            .to_string();

        tracing::Span::current().record("s3.upload_id", upload_id.as_str());
        tracing::debug!(upload_id = %upload_id, "CreateMultipartUpload completed");

        Ok(MultipartSession {
            container: container.to_string(),
            key: key.to_string(),
            upload_id,
        })
    }

    #[tracing::instrument(
        name = "s3.upload_part",
        skip(self, session, body),
        fields(
            s3.bucket = %session.container,
            s3.upload_id = %session.upload_id,
            s3.part_number = part_number,
            upload.bytes = body.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        body: Bytes,
    ) -> Result<CompletedPart, StorageError> {
        let output = self
            .inner
            .upload_part()
            .bucket(&session.container)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .part_number(sdk_part_number(part_number)?)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::service("UploadPart", DisplayErrorContext(&e).to_string()))?;

        let etag = output
            .e_tag()
            .ok_or(StorageError::MissingField {
                operation: "UploadPart",
                field: "ETag",
            })?
            .to_string();

        tracing::Span::current().record("s3.etag", etag.as_str());

        Ok(CompletedPart { part_number, etag })
    }

    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip(self, session, parts),
        fields(
            s3.bucket = %session.container,
            s3.upload_id = %session.upload_id,
            parts_count = parts.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    async fn complete_multipart_session(
        &self,
        session: &MultipartSession,
        parts: Vec<CompletedPart>,
    ) -> Result<String, StorageError> {
        let parts = parts
            .into_iter()
            .map(|part| {
                Ok(S3CompletedPart::builder()
                    .part_number(sdk_part_number(part.part_number)?)
                    .e_tag(part.etag)
                    .build())
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        let output = self
            .inner
            .complete_multipart_upload()
            .bucket(&session.container)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                StorageError::service(
                    "CompleteMultipartUpload",
                    DisplayErrorContext(&e).to_string(),
                )
            })?;

        let etag = output.e_tag().unwrap_or_default().to_string();
        tracing::Span::current().record("s3.etag", etag.as_str());

        Ok(etag)
    }

    #[tracing::instrument(
        name = "s3.abort_multipart_upload",
        skip(self, session),
        fields(s3.bucket = %session.container, s3.upload_id = %session.upload_id),
        err
    )]
    async fn abort_multipart_session(
        &self,
        session: &MultipartSession,
    ) -> Result<(), StorageError> {
        self.inner
            .abort_multipart_upload()
            .bucket(&session.container)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .send()
            .await
            .map_err(|e| {
                StorageError::service("AbortMultipartUpload", DisplayErrorContext(&e).to_string())
            })?;

        Ok(())
    }

    #[tracing::instrument(
        name = "s3.put_object",
        skip(self, body),
        fields(
            s3.bucket = %container,
            s3.key = %key,
            upload.bytes = body.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: Bytes,
    ) -> Result<String, StorageError> {
        let output = self
            .inner
            .put_object()
            .bucket(container)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::service("PutObject", DisplayErrorContext(&e).to_string()))?;

        let etag = output.e_tag().unwrap_or_default().to_string();
        tracing::Span::current().record("s3.etag", etag.as_str());

        Ok(etag)
    }
}
