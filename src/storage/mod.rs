//! Storage client capability
//!
//! The operations the uploader needs from an object store. [`crate::s3::S3Client`]
//! implements them against S3; tests substitute in-memory or mocked stores.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Storage client errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{operation} failed: {message}")]
    Service {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} response is missing {field}")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },

    #[error("Invalid part number: {0}")]
    InvalidPartNumber(u32),

    #[error("Client configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn service(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Service {
            operation,
            message: message.into(),
        }
    }
}

/// Open multipart session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartSession {
    pub container: String,
    pub key: String,
    pub upload_id: String,
}

/// Completion token of an uploaded part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Object store operations used by the uploader
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Whether the bucket exists and is reachable
    async fn container_exists(&self, container: &str) -> Result<bool, StorageError>;

    /// Whether the object exists; a missing object is `Ok(false)`
    async fn object_exists(&self, container: &str, key: &str) -> Result<bool, StorageError>;

    /// Start a multipart session for `key`
    async fn create_multipart_session(
        &self,
        container: &str,
        key: &str,
    ) -> Result<MultipartSession, StorageError>;

    /// Upload one part of an open session
    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        body: Bytes,
    ) -> Result<CompletedPart, StorageError>;

    /// Assemble the object from `parts`, which must be in ascending order.
    /// Returns the object's ETag.
    async fn complete_multipart_session(
        &self,
        session: &MultipartSession,
        parts: Vec<CompletedPart>,
    ) -> Result<String, StorageError>;

    /// Discard an open session and its parts
    async fn abort_multipart_session(&self, session: &MultipartSession)
        -> Result<(), StorageError>;

    /// Single-request upload. Returns the object's ETag.
    async fn put_object(&self, container: &str, key: &str, body: Bytes)
        -> Result<String, StorageError>;
}
