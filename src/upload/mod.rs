//! Upload module
//!
//! [`FileUploader`] runs the whole pipeline for one local file:
//!
//! 1. resolve the destination URL into bucket and key
//! 2. preflight the bucket and existing object
//! 3. plan the parts
//! 4. orchestrate the transfer with retries
//!
//! Errors fall into three kinds (see [`ErrorKind`]). Configuration and
//! precondition errors stop the run immediately; transfer errors are retried
//! by the orchestrator and only surface once every attempt has failed.

use crate::config::{ConfigError, UploadSettings};
use crate::destination::{self, DestinationError, DestinationTarget};
use crate::metrics::UploadMetrics;
use crate::preflight::{PreflightChecker, PreflightError};
use crate::size::SizeError;
use crate::storage::StorageClient;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod source;

pub use orchestrator::{
    OrchestratorOptions, RetryPolicy, Sleeper, TokioSleeper, TransferError, UploadOrchestrator,
    UploadOutcome, UploadState,
};
pub use plan::{Part, PartPlanner, PlanError, UploadPlan, MAX_PART_SIZE};
pub use progress::{ProgressReporter, ProgressSink};

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid size")]
    Size(#[from] SizeError),

    #[error(transparent)]
    Destination(#[from] DestinationError),

    #[error("Cannot plan parts")]
    Plan(#[from] PlanError),

    #[error("Cannot read source {path}")]
    Source {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Precondition(#[from] PreflightError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Upload failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad size expression, destination URL or settings
    Configuration,
    /// Missing bucket, unreadable source, or existing object without force
    Precondition,
    /// Failure while moving bytes
    Transfer,
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Config(_)
            | UploadError::Size(_)
            | UploadError::Destination(_)
            | UploadError::Plan(_) => ErrorKind::Configuration,
            UploadError::Source { .. } | UploadError::Precondition(_) => ErrorKind::Precondition,
            UploadError::Transfer(_) | UploadError::RetriesExhausted { .. } => ErrorKind::Transfer,
        }
    }

    /// Whether the orchestrator retries this kind of failure
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transfer
    }
}

/// Uploads local files with the configured settings
pub struct FileUploader {
    client: Arc<dyn StorageClient>,
    settings: UploadSettings,
    progress: Option<Arc<dyn ProgressSink>>,
    terminal_progress: bool,
    sleeper: Arc<dyn Sleeper>,
    metrics: Option<Arc<UploadMetrics>>,
}

impl FileUploader {
    pub fn new(client: Arc<dyn StorageClient>, settings: UploadSettings) -> Self {
        Self {
            client,
            settings,
            progress: None,
            terminal_progress: false,
            sleeper: Arc::new(TokioSleeper),
            metrics: None,
        }
    }

    /// Draw a progress line on stdout
    pub fn with_terminal_progress(mut self, enabled: bool) -> Self {
        self.terminal_progress = enabled;
        self
    }

    /// Report progress to `sink` instead of the terminal
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<UploadMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Upload `source` to the `destination` URL
    pub async fn upload(
        &self,
        source: &Path,
        destination: &str,
    ) -> Result<UploadOutcome, UploadError> {
        let target = destination::resolve_for_path(destination, source)?;
        let len = source::file_len(source)
            .await
            .map_err(|e| UploadError::Source {
                path: source.display().to_string(),
                source: e,
            })?;

        PreflightChecker::new(self.client.as_ref())
            .check(&target, self.settings.force)
            .await?;

        let plan = self.plan(len)?;
        tracing::info!(
            source = %source.display(),
            destination = %target,
            bytes = len,
            parts = plan.part_count(),
            part_size = plan.part_size(),
            "Planned upload"
        );

        self.orchestrator(source, &target, len)
            .upload(source, &target, &plan)
            .await
    }

    /// Part plan for a source of `len` bytes
    pub fn plan(&self, len: u64) -> Result<UploadPlan, PlanError> {
        PartPlanner::new(self.settings.part_size)
            .with_min_part_size(self.settings.min_part_size)
            .with_max_parts(self.settings.max_parts)
            .plan(len)
    }

    fn orchestrator(&self, source: &Path, target: &DestinationTarget, len: u64) -> UploadOrchestrator {
        let options = OrchestratorOptions {
            parallelism: self.settings.parallelism,
            multipart_threshold: self.settings.multipart_threshold,
            retry: RetryPolicy::new(self.settings.max_attempts, self.settings.retry_delay),
        };

        let mut orchestrator =
            UploadOrchestrator::new(self.client.clone(), options).with_sleeper(self.sleeper.clone());

        let progress = match (&self.progress, self.terminal_progress) {
            (Some(sink), _) => Some(sink.clone()),
            (None, true) => {
                let name = source
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| target.key.clone());
                Some(Arc::new(ProgressReporter::new(name, len)) as Arc<dyn ProgressSink>)
            }
            (None, false) => None,
        };
        if let Some(progress) = progress {
            orchestrator = orchestrator.with_progress(progress);
        }
        if let Some(metrics) = &self.metrics {
            orchestrator = orchestrator.with_metrics(metrics.clone());
        }
        orchestrator
    }
}
