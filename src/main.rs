//! s3-mp-upload - parallel multipart uploads to S3
//!
//! Uploads a single local file, splitting it into parts that are transferred
//! concurrently and retried as a whole on failure.

use clap::Parser;
use s3_mp_upload::config::Config;
use s3_mp_upload::destination;
use s3_mp_upload::logging::{self, LogOptions};
use s3_mp_upload::metrics::UploadMetrics;
use s3_mp_upload::s3::S3Client;
use s3_mp_upload::size;
use s3_mp_upload::upload::{source, FileUploader, UploadError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transfer a file to S3 as a parallel multipart upload
#[derive(Parser, Debug)]
#[command(name = "s3-mp-upload")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Local file to upload
    src: PathBuf,

    /// Destination, s3://bucket/path (a trailing / appends the file name)
    dest: String,

    /// Number of parts to upload in parallel
    #[arg(short = 'p', long = "num-processes", visible_alias = "np")]
    num_processes: Option<usize>,

    /// Overwrite an existing object
    #[arg(short, long)]
    force: bool,

    /// Part size, e.g. "50 MiB" or "100MB"; bare numbers are MiB
    #[arg(short, long, value_name = "SIZE", long_help = split_long_help())]
    split: Option<String>,

    /// Files smaller than this are sent with a single PUT
    #[arg(long, value_name = "SIZE")]
    multipart_threshold: Option<String>,

    /// Maximum number of upload attempts
    #[arg(short = 't', long = "max-tries")]
    max_tries: Option<u32>,

    /// Seconds to wait before the first retry, doubled after every failure
    #[arg(long = "retry-sleep", value_name = "SECS")]
    retry_sleep: Option<u64>,

    /// Accepted for compatibility, has no effect
    #[arg(long = "reduced-redundancy", visible_alias = "rrs")]
    reduced_redundancy: bool,

    /// Accepted for compatibility, has no effect
    #[arg(long)]
    insecure: bool,

    /// Debug logging and a progress line
    #[arg(short, long)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Path to YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// S3-compatible endpoint URL
    #[arg(long)]
    endpoint: Option<String>,

    /// AWS region
    #[arg(long)]
    region: Option<String>,

    /// AWS profile
    #[arg(long)]
    profile: Option<String>,

    /// Write Prometheus metrics to this file after the run
    #[arg(long, value_name = "FILE")]
    metrics_file: Option<PathBuf>,

    /// Log as JSON
    #[arg(long)]
    log_json: bool,
}

/// `--split` help listing every accepted unit
fn split_long_help() -> String {
    format!(
        "Part size, e.g. \"50 MiB\" or \"100MB\"; bare numbers are MiB.\n\n\
         Accepted units: {}",
        size::unit_names().join(", ")
    )
}

impl Args {
    /// Command-line flags override the configuration file
    fn apply(&self, config: &mut Config) {
        let upload = &mut config.upload;
        if let Some(n) = self.num_processes {
            upload.parallelism = n;
        }
        if let Some(ref split) = self.split {
            upload.part_size = split.clone();
        }
        if let Some(ref threshold) = self.multipart_threshold {
            upload.multipart_threshold = threshold.clone();
        }
        if let Some(n) = self.max_tries {
            upload.max_attempts = n;
        }
        if let Some(secs) = self.retry_sleep {
            upload.retry_delay_secs = secs;
        }
        if self.force {
            upload.force = true;
        }

        let s3 = &mut config.s3;
        if self.endpoint.is_some() {
            s3.endpoint = self.endpoint.clone();
        }
        if self.region.is_some() {
            s3.region = self.region.clone();
        }
        if self.profile.is_some() {
            s3.profile = self.profile.clone();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let options = LogOptions {
        verbose: args.verbose,
        quiet: args.quiet,
        json: args.log_json,
    };
    if let Err(e) = logging::init_subscriber(&options) {
        eprintln!("Warning: {:#}", anyhow::Error::from(e));
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match args.config {
        Some(ref path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::default(),
    };
    args.apply(&mut config);
    config.validate()?;
    let settings = config.upload.resolve()?;

    if args.reduced_redundancy || args.insecure {
        debug!(
            reduced_redundancy = args.reduced_redundancy,
            insecure = args.insecure,
            "Ignoring compatibility flags"
        );
    }

    // Fail on bad input before the client touches the network
    destination::resolve_for_path(&args.dest, &args.src).map_err(UploadError::from)?;
    source::file_len(&args.src)
        .await
        .map_err(|e| UploadError::Source {
            path: args.src.display().to_string(),
            source: e,
        })?;

    let metrics = match args.metrics_file {
        Some(_) => Some(Arc::new(UploadMetrics::new()?)),
        None => None,
    };

    let client = S3Client::new(&config.s3).await?;
    let mut uploader =
        FileUploader::new(Arc::new(client), settings).with_terminal_progress(args.verbose);
    if let Some(ref metrics) = metrics {
        uploader = uploader.with_metrics(metrics.clone());
    }

    let result = uploader.upload(&args.src, &args.dest).await;

    if let (Some(metrics), Some(path)) = (&metrics, &args.metrics_file) {
        if let Err(e) = metrics.write_textfile(path) {
            warn!(
                path = %path.display(),
                error = &e as &(dyn std::error::Error + 'static),
                "Failed to write metrics"
            );
        }
    }

    let outcome = result?;
    info!(
        attempts = outcome.attempts,
        bytes = outcome.bytes,
        parts = outcome.parts,
        etag = %outcome.etag,
        "Upload complete"
    );

    Ok(())
}
