//! Preflight checks
//!
//! Fast, non-retried precondition checks run before any bytes move: the
//! bucket must exist and the destination object must not, unless overwrite
//! was requested.

use crate::destination::DestinationTarget;
use crate::storage::{StorageClient, StorageError};
use thiserror::Error;

/// Precondition failures
#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("Bucket does not exist: {0}")]
    ContainerMissing(String),

    #[error("Cannot access bucket {container}")]
    ContainerProbe {
        container: String,
        source: StorageError,
    },

    #[error("Object {key} already exists in bucket {container}; use --force to overwrite")]
    ObjectExists { key: String, container: String },

    #[error("Cannot check for existing object {key}")]
    ObjectProbe { key: String, source: StorageError },
}

/// Checks a destination before upload
pub struct PreflightChecker<'a> {
    client: &'a dyn StorageClient,
}

impl<'a> PreflightChecker<'a> {
    pub fn new(client: &'a dyn StorageClient) -> Self {
        Self { client }
    }

    /// Verify `target` may be written. With `force` an existing object is
    /// accepted and will be replaced on completion.
    #[tracing::instrument(
        name = "upload.preflight",
        skip(self, target),
        fields(s3.bucket = %target.container, s3.key = %target.key),
        err
    )]
    pub async fn check(&self, target: &DestinationTarget, force: bool) -> Result<(), PreflightError> {
        let exists = self
            .client
            .container_exists(&target.container)
            .await
            .map_err(|e| PreflightError::ContainerProbe {
                container: target.container.clone(),
                source: e,
            })?;
        if !exists {
            return Err(PreflightError::ContainerMissing(target.container.clone()));
        }

        let exists = self
            .client
            .object_exists(&target.container, &target.key)
            .await
            .map_err(|e| PreflightError::ObjectProbe {
                key: target.key.clone(),
                source: e,
            })?;

        match (exists, force) {
            (true, false) => Err(PreflightError::ObjectExists {
                key: target.key.clone(),
                container: target.container.clone(),
            }),
            (true, true) => {
                tracing::info!(destination = %target, "Overwriting existing object");
                Ok(())
            }
            (false, _) => Ok(()),
        }
    }
}
