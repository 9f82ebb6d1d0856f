//! Tracing setup for a deployment.
//!
//! Log lines go to stderr and, when a path is given, to an append-only file.
//! File lines carry a UTC `HH:MM:SS` prefix and no ANSI colour codes.

use crate::error::{SonarError, SonarResult};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Timestamp prefix of deployment log lines.
pub const FILE_TIME_FORMAT: &str = "%H:%M:%S:";

/// Log file path for a deployment: `<dir>/deployment_<id>.log`.
pub fn log_path(dir: &Path, deployment: &str) -> PathBuf {
    dir.join(format!("deployment_{}.log", deployment))
}

/// Open `path` for appending, creating it and its parent directory.
pub fn open_log_file(path: &Path) -> SonarResult<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Plain-text layer for the deployment log: UTC time prefix, message only.
pub fn file_layer<S, W>(writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_level(false)
        .with_timer(ChronoUtc::new(FILE_TIME_FORMAT.to_string()))
        .boxed()
}

/// Install the global subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to `debug` when `verbose` is
/// set and `info` otherwise. Calling this twice is harmless; the second call
/// leaves the first subscriber in place.
///
/// # Errors
///
/// Returns `Io` if the log file cannot be created.
pub fn init(log_file: Option<&Path>, verbose: bool) -> SonarResult<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let file_output = match log_file {
        Some(path) => Some(file_layer(Mutex::new(open_log_file(path)?))),
        None => None,
    };

    // Err only means a subscriber is already installed
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_output)
        .try_init();

    Ok(())
}

/// Install the subscriber with the deployment log file under `dir`, returning its path.
pub fn init_deployment(dir: &Path, deployment: &str, verbose: bool) -> SonarResult<PathBuf> {
    let path = log_path(dir, deployment);
    init(Some(&path), verbose).map_err(|e| {
        SonarError::StartupFailure(format!("failed to create log file {}: {}", path.display(), e))
    })?;
    Ok(path)
}
