//! Upload orchestration
//!
//! Drives a part plan through the storage client with bounded concurrency and
//! whole-attempt retries.
//!
//! # Attempt lifecycle
//!
//! ```text
//! Idle -> SessionOpen -> PartsInFlight -> Completing -> Done
//!                              |               |
//!                              +--> Aborting <-+--> Idle (next attempt) | Failed
//! ```
//!
//! An attempt opens a fresh multipart session, uploads every part with at
//! most `parallelism` transfers in flight, and completes the session with the
//! completion tokens in ascending part order. The first part failure stops
//! the attempt: unstarted parts are never spawned, running ones are aborted
//! and awaited, and the session is aborted best-effort. Nothing carries over
//! to the next attempt.
//!
//! Sources smaller than the multipart threshold are sent with one direct put
//! under the same retry rules.
//!
//! Between attempts the orchestrator sleeps `d, 2d, 4d, ...`; there is no
//! sleep after the last attempt.

use super::plan::{Part, UploadPlan};
use super::progress::ProgressSink;
use super::source;
use super::UploadError;
use crate::destination::DestinationTarget;
use crate::metrics::UploadMetrics;
use crate::storage::{CompletedPart, MultipartSession, StorageClient, StorageError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinSet;

/// Failure of a single attempt
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Failed to read part {part_number} from source")]
    Read {
        part_number: u32,
        source: std::io::Error,
    },

    #[error("Failed to create multipart upload for {target}")]
    CreateSession {
        target: String,
        source: StorageError,
    },

    #[error("Failed to upload part {part_number}")]
    Part {
        part_number: u32,
        source: StorageError,
    },

    #[error("Failed to complete multipart upload {upload_id}")]
    Complete {
        upload_id: String,
        source: StorageError,
    },

    #[error("Failed to upload {target}")]
    Put {
        target: String,
        source: StorageError,
    },

    #[error("Multipart upload {upload_id} has {uploaded} of {expected} parts")]
    IncompleteParts {
        upload_id: String,
        uploaded: usize,
        expected: usize,
    },

    #[error("Part worker stopped")]
    Worker(#[from] tokio::task::JoinError),
}

/// Orchestrator states, reported in debug logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    SessionOpen,
    PartsInFlight,
    Completing,
    Done,
    Aborting,
    Failed,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Idle => "idle",
            UploadState::SessionOpen => "session_open",
            UploadState::PartsInFlight => "parts_in_flight",
            UploadState::Completing => "completing",
            UploadState::Done => "done",
            UploadState::Aborting => "aborting",
            UploadState::Failed => "failed",
        }
    }
}

fn transition(attempt: u32, state: UploadState) {
    tracing::debug!(attempt = attempt, state = state.as_str(), "Upload state changed");
}

/// Attempt limit and backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
        }
    }

    /// Delays slept between attempts: `d, 2d, 4d, ...`, one fewer than the
    /// attempt count. Doubling saturates at `Duration::MAX`.
    pub fn backoff_schedule(&self) -> impl Iterator<Item = Duration> {
        let gaps = self.max_attempts.saturating_sub(1);
        (0..gaps).scan(self.initial_delay, |delay, _| {
            let current = *delay;
            *delay = delay.saturating_mul(2);
            Some(current)
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(10))
    }
}

/// Waits between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// [`Sleeper`] backed by the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Most part transfers in flight at once
    pub parallelism: usize,
    /// Sources at or above this length use a multipart session
    pub multipart_threshold: u64,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            parallelism: 2,
            multipart_threshold: 50 * 1024 * 1024,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Attempts used, including the successful one
    pub attempts: u32,
    pub etag: String,
    pub bytes: u64,
    /// Parts in the completed session; 1 for a direct put
    pub parts: usize,
    pub multipart: bool,
}

/// Everything a part worker needs, owned so it can run on its own task
struct PartJob {
    client: Arc<dyn StorageClient>,
    session: Arc<MultipartSession>,
    source: Arc<PathBuf>,
    part: Part,
    progress: Option<Arc<dyn ProgressSink>>,
    metrics: Option<Arc<UploadMetrics>>,
}

impl PartJob {
    async fn run(self) -> Result<CompletedPart, TransferError> {
        let started = Instant::now();
        let part_number = self.part.index;

        let body = source::read_range(&self.source, self.part.offset, self.part.length)
            .await
            .map_err(|e| TransferError::Read {
                part_number,
                source: e,
            })?;

        let uploaded = self
            .client
            .upload_part(&self.session, part_number, body)
            .await
            .map_err(|e| TransferError::Part {
                part_number,
                source: e,
            })?;

        if let Some(progress) = &self.progress {
            progress.bytes_completed(self.part.length);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_part(self.part.length, started.elapsed().as_secs_f64());
        }

        tracing::debug!(
            part_number = part_number,
            bytes = self.part.length,
            duration_ms = started.elapsed().as_millis() as u64,
            "Uploaded part"
        );

        Ok(CompletedPart {
            part_number,
            etag: uploaded.etag,
        })
    }
}

/// Multipart upload orchestrator
pub struct UploadOrchestrator {
    client: Arc<dyn StorageClient>,
    options: OrchestratorOptions,
    progress: Option<Arc<dyn ProgressSink>>,
    sleeper: Arc<dyn Sleeper>,
    metrics: Option<Arc<UploadMetrics>>,
}

impl UploadOrchestrator {
    pub fn new(client: Arc<dyn StorageClient>, options: OrchestratorOptions) -> Self {
        Self {
            client,
            options,
            progress: None,
            sleeper: Arc::new(TokioSleeper),
            metrics: None,
        }
    }

    /// Report completed bytes to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Wait between attempts with `sleeper`
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Record attempts, parts and aborts in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<UploadMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Upload `source` to `target` following `plan`.
    ///
    /// On exhaustion the error of the last attempt is returned.
    #[tracing::instrument(
        name = "upload.orchestrate",
        skip(self, source, target, plan),
        fields(
            upload.source = %source.display(),
            s3.bucket = %target.container,
            s3.key = %target.key,
            upload.bytes = plan.total_len(),
            upload.parts = plan.part_count()
        )
    )]
    pub async fn upload(
        &self,
        source: &Path,
        target: &DestinationTarget,
        plan: &UploadPlan,
    ) -> Result<UploadOutcome, UploadError> {
        let max_attempts = self.options.retry.max_attempts;
        let multipart = plan.total_len() >= self.options.multipart_threshold;
        let source = Arc::new(source.to_path_buf());
        let mut delays = self.options.retry.backoff_schedule();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            transition(attempt, UploadState::Idle);
            if let Some(progress) = &self.progress {
                progress.reset();
            }

            tracing::info!(
                attempt = attempt,
                max_attempts = max_attempts,
                multipart = multipart,
                "Starting upload"
            );

            let result = if multipart {
                self.attempt_multipart(attempt, &source, target, plan).await
            } else {
                self.attempt_direct(&source, target, plan).await
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_attempt(result.is_ok());
            }

            match result {
                Ok(etag) => {
                    transition(attempt, UploadState::Done);
                    if let Some(progress) = &self.progress {
                        progress.finish();
                    }
                    tracing::info!(attempt = attempt, etag = %etag, "Finished upload");

                    return Ok(UploadOutcome {
                        attempts: attempt,
                        etag,
                        bytes: plan.total_len(),
                        parts: if multipart { plan.part_count() } else { 1 },
                        multipart,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        attempt = attempt,
                        error = &e as &(dyn std::error::Error + 'static),
                        "Error during upload"
                    );
                    last_error = Some(e);
                }
            }

            if let Some(delay) = delays.next() {
                tracing::warn!(
                    delay_secs = delay.as_secs_f64(),
                    "Sleeping before next attempt"
                );
                self.sleeper.sleep(delay).await;
            }
        }

        transition(max_attempts, UploadState::Failed);
        tracing::error!(attempts = max_attempts, "Maximum upload attempts exceeded");

        Err(match last_error {
            Some(e) => UploadError::Transfer(e),
            None => UploadError::RetriesExhausted {
                attempts: max_attempts,
            },
        })
    }

    async fn attempt_direct(
        &self,
        source: &Path,
        target: &DestinationTarget,
        plan: &UploadPlan,
    ) -> Result<String, TransferError> {
        let started = Instant::now();
        let len = plan.total_len();

        let body = source::read_range(source, 0, len)
            .await
            .map_err(|e| TransferError::Read {
                part_number: 1,
                source: e,
            })?;

        let etag = self
            .client
            .put_object(&target.container, &target.key, body)
            .await
            .map_err(|e| TransferError::Put {
                target: target.to_string(),
                source: e,
            })?;

        if let Some(progress) = &self.progress {
            progress.bytes_completed(len);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_part(len, started.elapsed().as_secs_f64());
        }

        Ok(etag)
    }

    async fn attempt_multipart(
        &self,
        attempt: u32,
        source: &Arc<PathBuf>,
        target: &DestinationTarget,
        plan: &UploadPlan,
    ) -> Result<String, TransferError> {
        let session = self
            .client
            .create_multipart_session(&target.container, &target.key)
            .await
            .map_err(|e| TransferError::CreateSession {
                target: target.to_string(),
                source: e,
            })?;
        let session = Arc::new(session);

        transition(attempt, UploadState::SessionOpen);
        tracing::info!(upload_id = %session.upload_id, "Created multipart upload");

        let result = self.finish_session(attempt, &session, source, plan).await;
        if result.is_err() {
            self.abort_session(attempt, &session).await;
        }
        result
    }

    async fn finish_session(
        &self,
        attempt: u32,
        session: &Arc<MultipartSession>,
        source: &Arc<PathBuf>,
        plan: &UploadPlan,
    ) -> Result<String, TransferError> {
        let parts = self.transfer_parts(attempt, session, source, plan).await?;

        transition(attempt, UploadState::Completing);
        self.client
            .complete_multipart_session(session, parts)
            .await
            .map_err(|e| TransferError::Complete {
                upload_id: session.upload_id.clone(),
                source: e,
            })
    }

    /// Run the bounded worker pool over every part of `plan`.
    async fn transfer_parts(
        &self,
        attempt: u32,
        session: &Arc<MultipartSession>,
        source: &Arc<PathBuf>,
        plan: &UploadPlan,
    ) -> Result<Vec<CompletedPart>, TransferError> {
        transition(attempt, UploadState::PartsInFlight);

        let parallelism = self.options.parallelism.max(1);
        let mut pending = plan.parts().iter().copied();
        let mut workers = JoinSet::new();
        let mut completed = BTreeMap::new();

        loop {
            while workers.len() < parallelism {
                let Some(part) = pending.next() else {
                    break;
                };
                let job = PartJob {
                    client: self.client.clone(),
                    session: session.clone(),
                    source: source.clone(),
                    part,
                    progress: self.progress.clone(),
                    metrics: self.metrics.clone(),
                };
                workers.spawn(job.run());
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };

            match joined.map_err(TransferError::from).and_then(|result| result) {
                Ok(part) => {
                    completed.insert(part.part_number, part);
                }
                Err(e) => {
                    // stop unstarted parts and wait out the running ones
                    workers.shutdown().await;
                    return Err(e);
                }
            }
        }

        if completed.len() != plan.part_count() {
            return Err(TransferError::IncompleteParts {
                upload_id: session.upload_id.clone(),
                uploaded: completed.len(),
                expected: plan.part_count(),
            });
        }

        Ok(completed.into_values().collect())
    }

    async fn abort_session(&self, attempt: u32, session: &MultipartSession) {
        transition(attempt, UploadState::Aborting);

        let result = self.client.abort_multipart_session(session).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_abort(result.is_ok());
        }

        match result {
            Ok(()) => {
                tracing::info!(upload_id = %session.upload_id, "Aborted multipart upload");
            }
            Err(e) => {
                tracing::warn!(
                    upload_id = %session.upload_id,
                    error = %e,
                    "Failed to abort multipart upload"
                );
            }
        }
    }
}
