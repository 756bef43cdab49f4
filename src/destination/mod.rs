//! Destination resolution
//!
//! Turns an `s3://bucket/path` destination and the source file name into the
//! final bucket and object key.
//!
//! | Destination path | Resulting key |
//! |------------------|---------------|
//! | empty or `/` | source file name |
//! | `a/b/` | `a/b/<source file name>` |
//! | `a/b/obj` | `a/b/obj` |
//!
//! Keys never start with `/`. Apart from that the path is used exactly as
//! written: percent escapes stay encoded and `.` or `..` segments are kept.
//! A query string or fragment is not part of the key.

use std::fmt;
use std::path::Path;
use thiserror::Error;
use url::Url;

/// URL scheme accepted for destinations
pub const STORAGE_SCHEME: &str = "s3";

/// Destination resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DestinationError {
    #[error("Destination must be an S3 URL: {0}")]
    NotStorageUrl(String),

    #[error("Destination has no bucket: {0}")]
    MissingContainer(String),

    #[error("Source has no file name: {0}")]
    MissingSourceName(String),
}

/// Resolved upload destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTarget {
    pub container: String,
    pub key: String,
}

impl fmt::Display for DestinationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", STORAGE_SCHEME, self.container, self.key)
    }
}

/// Resolve `destination` for a source whose base name is `source_name`.
pub fn resolve(destination: &str, source_name: &str) -> Result<DestinationTarget, DestinationError> {
    let url = Url::parse(destination)
        .map_err(|_| DestinationError::NotStorageUrl(destination.to_string()))?;

    if url.scheme() != STORAGE_SCHEME {
        tracing::error!(destination = %destination, "Destination is not an S3 URL");
        return Err(DestinationError::NotStorageUrl(destination.to_string()));
    }

    let container = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => return Err(DestinationError::MissingContainer(destination.to_string())),
    };

    let path = raw_path(destination);
    let key = if path.is_empty() || path == "/" {
        source_name.to_string()
    } else if path.ends_with('/') {
        format!("{}{}", path.trim_start_matches('/'), source_name)
    } else {
        path.trim_start_matches('/').to_string()
    };

    Ok(DestinationTarget { container, key })
}

/// Path of `destination` as written: everything after the authority, up to
/// any query or fragment.
fn raw_path(destination: &str) -> &str {
    let after_scheme = destination.split_once("://").map_or("", |(_, rest)| rest);
    let end = after_scheme.find(['?', '#']).unwrap_or(after_scheme.len());
    let hierarchy = &after_scheme[..end];
    hierarchy.find('/').map_or("", |start| &hierarchy[start..])
}

/// Resolve `destination` for the file at `source`.
pub fn resolve_for_path(
    destination: &str,
    source: &Path,
) -> Result<DestinationTarget, DestinationError> {
    let name = source
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| DestinationError::MissingSourceName(source.display().to_string()))?;
    resolve(destination, name)
}
