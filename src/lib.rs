//! S3 multipart uploader library
//!
//! Uploads one local file to S3 as a parallel multipart upload.
//!
//! # Features
//!
//! - **Parallel parts**: bounded number of part transfers in flight
//! - **Whole-attempt retries**: exponential backoff, every failed session aborted
//! - **Size expressions**: `50 MiB`, `1GB`, `512 kibibytes`
//! - **Preflight**: refuses to overwrite existing objects unless forced
//! - **S3 compatible**: custom endpoints with path-style addressing
//!
//! # Example
//!
//! ```no_run
//! use s3_mp_upload::{config::Config, s3::S3Client, upload::FileUploader};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let client = S3Client::new(&config.s3).await?;
//!     let uploader = FileUploader::new(Arc::new(client), config.upload.resolve()?);
//!     uploader.upload(Path::new("big.iso"), "s3://bucket/images/").await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod destination;
pub mod logging;
pub mod metrics;
pub mod preflight;
pub mod s3;
pub mod size;
pub mod storage;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use destination::DestinationTarget;
pub use storage::StorageClient;
pub use upload::{FileUploader, UploadError, UploadOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
