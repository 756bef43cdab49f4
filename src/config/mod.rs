//! Configuration module for s3-mp-upload
//!
//! Typed upload and S3 client settings with documented defaults. Settings can
//! be loaded from a YAML file (with environment variable expansion) and are
//! then overridden by command-line flags.
//!
//! # Example
//!
//! ```yaml
//! upload:
//!   parallelism: 4
//!   part_size: "64 MiB"
//!   retry_delay_secs: 5
//! s3:
//!   region: "${AWS_REGION:-us-east-1}"
//!   endpoint: "http://localhost:9000"
//! ```

use crate::size::{parse_byte_count, SizeError};
use crate::upload::MAX_PART_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid size in configuration")]
    SizeError(#[from] SizeError),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub s3: S3Config,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upload.resolve()?;

        if let Some(ref endpoint) = self.s3.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid S3 endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
        }

        if self.s3.access_key.is_some() != self.s3.secret_key.is_some() {
            return Err(ConfigError::ValidationError(
                "access_key and secret_key must be configured together".into(),
            ));
        }

        if self.s3.sdk_max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "sdk_max_attempts must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Upload Configuration
// ============================================================================

/// Upload behaviour as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Concurrent part transfers. Default: 2
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Total upload attempts before giving up. Default: 10
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Part size expression. Default: "50 MiB"
    #[serde(default = "default_part_size")]
    pub part_size: String,

    /// Files at or above this size use multipart upload. Default: "50 MiB"
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: String,

    /// Smallest part the store accepts for all but the last part. Default: "5 MiB"
    #[serde(default = "default_min_part_size")]
    pub min_part_size: String,

    /// Most parts a session may hold. Default: 10000
    #[serde(default = "default_max_parts")]
    pub max_parts: u32,

    /// First backoff delay in seconds, doubled after each failure. Default: 10
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Overwrite an existing destination object. Default: false
    #[serde(default)]
    pub force: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_attempts: default_max_attempts(),
            part_size: default_part_size(),
            multipart_threshold: default_multipart_threshold(),
            min_part_size: default_min_part_size(),
            max_parts: default_max_parts(),
            retry_delay_secs: default_retry_delay_secs(),
            force: false,
        }
    }
}

impl UploadConfig {
    /// Validate and convert into byte counts and durations
    pub fn resolve(&self) -> Result<UploadSettings, ConfigError> {
        if self.parallelism == 0 {
            return Err(ConfigError::ValidationError(
                "parallelism must be at least 1".into(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_attempts must be at least 1".into(),
            ));
        }

        if self.max_parts == 0 {
            return Err(ConfigError::ValidationError(
                "max_parts must be at least 1".into(),
            ));
        }

        let part_size = parse_byte_count(&self.part_size)?;
        if part_size == 0 {
            return Err(ConfigError::ValidationError(format!(
                "part_size '{}' must be greater than zero",
                self.part_size
            )));
        }

        if part_size > MAX_PART_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "part_size '{}' exceeds the 5 GiB part limit",
                self.part_size
            )));
        }

        let multipart_threshold = parse_byte_count(&self.multipart_threshold)?;
        if multipart_threshold > MAX_PART_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "multipart_threshold '{}' exceeds the 5 GiB single upload limit",
                self.multipart_threshold
            )));
        }

        Ok(UploadSettings {
            parallelism: self.parallelism,
            max_attempts: self.max_attempts,
            part_size,
            multipart_threshold,
            min_part_size: parse_byte_count(&self.min_part_size)?,
            max_parts: self.max_parts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            force: self.force,
        })
    }
}

fn default_parallelism() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    10
}

fn default_part_size() -> String {
    "50 MiB".to_string()
}

fn default_multipart_threshold() -> String {
    "50 MiB".to_string()
}

fn default_min_part_size() -> String {
    "5 MiB".to_string()
}

fn default_max_parts() -> u32 {
    10_000
}

fn default_retry_delay_secs() -> u64 {
    10
}

/// Resolved upload settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    pub parallelism: usize,
    pub max_attempts: u32,
    pub part_size: u64,
    pub multipart_threshold: u64,
    pub min_part_size: u64,
    pub max_parts: u32,
    pub retry_delay: Duration,
    pub force: bool,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_attempts: default_max_attempts(),
            part_size: 50 * 1024 * 1024,
            multipart_threshold: 50 * 1024 * 1024,
            min_part_size: 5 * 1024 * 1024,
            max_parts: default_max_parts(),
            retry_delay: Duration::from_secs(default_retry_delay_secs()),
            force: false,
        }
    }
}

// ============================================================================
// S3 Client Configuration
// ============================================================================

/// S3 backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Region; falls back to the AWS default chain, then us-east-1
    #[serde(default)]
    pub region: Option<String>,

    /// Named AWS profile
    #[serde(default)]
    pub profile: Option<String>,

    /// Custom endpoint for S3-compatible stores. Implies path-style addressing.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub force_path_style: bool,

    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<String>,

    #[serde(default)]
    pub session_token: Option<String>,

    /// Attempts the SDK makes for a single request. Default: 3
    #[serde(default = "default_sdk_max_attempts")]
    pub sdk_max_attempts: u32,

    /// Per-request attempt timeout in seconds
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            endpoint: None,
            force_path_style: false,
            access_key: None,
            secret_key: None,
            session_token: None,
            sdk_max_attempts: default_sdk_max_attempts(),
            timeout_seconds: None,
        }
    }
}

fn default_sdk_max_attempts() -> u32 {
    3
}
