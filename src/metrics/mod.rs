//! Metrics module
//!
//! Prometheus metrics for one upload run. Each [`UploadMetrics`] owns its own
//! registry and is handed to the orchestrator explicitly; nothing is
//! registered globally. The collected values can be written in the text
//! exposition format for a node_exporter textfile collector.

use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::path::Path;
use thiserror::Error;

/// Metrics errors
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Prometheus error")]
    Prometheus(#[from] prometheus::Error),

    #[error("Failed to write metrics")]
    IoError(#[from] std::io::Error),
}

/// Upload metrics for a single invocation
#[derive(Clone)]
pub struct UploadMetrics {
    registry: Registry,
    attempts: CounterVec,
    parts: Counter,
    bytes: Counter,
    aborts: CounterVec,
    part_duration: Histogram,
}

impl UploadMetrics {
    /// Create metrics backed by a fresh registry
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let attempts = CounterVec::new(
            Opts::new("s3mp_upload_attempts_total", "Upload attempts by outcome"),
            &["outcome"],
        )?;
        let parts = Counter::new("s3mp_parts_uploaded_total", "Parts uploaded successfully")?;
        let bytes = Counter::new("s3mp_upload_bytes_total", "Bytes uploaded successfully")?;
        let aborts = CounterVec::new(
            Opts::new(
                "s3mp_multipart_aborts_total",
                "Multipart session aborts by result",
            ),
            &["status"],
        )?;
        let part_duration = Histogram::with_opts(
            HistogramOpts::new(
                "s3mp_part_duration_seconds",
                "Part transfer duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
        )?;

        registry.register(Box::new(attempts.clone()))?;
        registry.register(Box::new(parts.clone()))?;
        registry.register(Box::new(bytes.clone()))?;
        registry.register(Box::new(aborts.clone()))?;
        registry.register(Box::new(part_duration.clone()))?;

        Ok(Self {
            registry,
            attempts,
            parts,
            bytes,
            aborts,
            part_duration,
        })
    }

    /// Record the end of an attempt
    pub fn record_attempt(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.attempts.with_label_values(&[outcome]).inc();
    }

    /// Record a transferred part or direct put
    pub fn record_part(&self, bytes: u64, duration_secs: f64) {
        self.parts.inc();
        self.bytes.inc_by(bytes as f64);
        self.part_duration.observe(duration_secs);
    }

    /// Record a session abort
    pub fn record_abort(&self, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.aborts.with_label_values(&[status]).inc();
    }

    /// Attempts recorded with the given outcome
    pub fn attempts(&self, success: bool) -> u64 {
        let outcome = if success { "success" } else { "failure" };
        self.attempts.with_label_values(&[outcome]).get() as u64
    }

    /// Bytes recorded so far
    pub fn bytes(&self) -> u64 {
        self.bytes.get() as u64
    }

    /// Render the text exposition format
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Write the text exposition format to `path`
    pub fn write_textfile<P: AsRef<Path>>(&self, path: P) -> Result<(), MetricsError> {
        std::fs::write(path, self.render()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_attempts() {
        let metrics = UploadMetrics::new().unwrap();
        metrics.record_attempt(false);
        metrics.record_attempt(false);
        metrics.record_attempt(true);

        assert_eq!(metrics.attempts(false), 2);
        assert_eq!(metrics.attempts(true), 1);
    }

    #[test]
    fn test_record_part_accumulates_bytes() {
        let metrics = UploadMetrics::new().unwrap();
        metrics.record_part(1024, 0.01);
        metrics.record_part(2048, 0.02);
        assert_eq!(metrics.bytes(), 3072);
    }

    #[test]
    fn test_registries_are_independent() {
        let first = UploadMetrics::new().unwrap();
        let second = UploadMetrics::new().unwrap();
        first.record_part(10, 0.1);
        assert_eq!(second.bytes(), 0);
    }

    #[test]
    fn test_render_text_format() {
        let metrics = UploadMetrics::new().unwrap();
        metrics.record_abort(true);
        metrics.record_part(5, 0.2);

        let text = metrics.render().unwrap();
        assert!(text.contains("s3mp_multipart_aborts_total{status=\"success\"} 1"));
        assert!(text.contains("s3mp_upload_bytes_total 5"));
    }

    #[test]
    fn test_write_textfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.prom");
        let metrics = UploadMetrics::new().unwrap();
        metrics.record_attempt(true);
        metrics.write_textfile(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("s3mp_upload_attempts_total{outcome=\"success\"} 1"));
    }
}
