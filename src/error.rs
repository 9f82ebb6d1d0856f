//! Error types for the sonar driver.
//!
//! `SonarError` is the single error type returned across the crate. Following the
//! taxonomy the deployment runner relies on, errors fall into two groups:
//!
//! - **Fatal** (abort the deployment before or during startup): `Config`,
//!   `Connection`, `StartupFailure`, and `DataSink` when a scan file cannot be created.
//! - **Non-fatal** (degrade data completeness, the session keeps running):
//!   [`TransactionFailure`] and [`ParseFailure`] during steady-state stepping, and
//!   configuration corrections, which never surface as errors at all but as
//!   [`crate::config::ConfigCorrection`] records in the log.
//!
//! The protocol-level failures are separate enums so callers can match on them
//! without digging through strings, and convert into `SonarError` with `?`.

use std::io;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type SonarResult<T> = std::result::Result<T, SonarError>;

/// Top-level error for configuration, connection, scanning and archive handling.
#[derive(Error, Debug)]
pub enum SonarError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Connection error: {0}")]
    Connection(String),

    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Startup failure: {0}")]
    StartupFailure(String),

    #[error(transparent)]
    Transaction(#[from] TransactionFailure),

    #[error(transparent)]
    Parse(#[from] ParseFailure),

    #[error("Data sink error: {0}")]
    DataSink(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for SonarError {
    fn from(err: figment::Error) -> Self {
        SonarError::Config(Box::new(err))
    }
}

/// Why a raw response could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("response too short (len={len})")]
    TooShort { len: usize },

    #[error("response header is not ASCII")]
    BadEncoding,

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Why a single write/read attempt failed.
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error("failed to send command: {0}")]
    Write(#[source] io::Error),

    #[error("sent {written} bytes, expected {expected}")]
    ShortWrite { written: usize, expected: usize },

    #[error("failed to read response: {0}")]
    Read(#[source] io::Error),

    #[error("bad/unterminated response (len={len})")]
    Unterminated { len: usize },
}

/// Every attempt of a transaction failed; the step produced no data.
#[derive(Error, Debug)]
#[error("transaction failed after {attempts} attempt(s): {last}")]
pub struct TransactionFailure {
    /// Number of attempts made, including the first.
    pub attempts: u32,
    /// Failure of the final attempt.
    #[source]
    pub last: AttemptError,
}
