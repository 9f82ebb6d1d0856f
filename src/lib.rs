//! Driver library for the Melt Stake 881A scanning sonar.
//!
//! The crate builds the 27-byte binary switch command, decodes the head's
//! responses, validates deployment configuration, and runs the sweep-tracking
//! scan controller that archives raw frames into per-scan files. It is used by
//! the `meltstake-sonar` binary and by the integration tests.

#[cfg(feature = "storage_csv")]
pub mod archive;
pub mod config;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod protocol;
pub mod scan;
pub mod session;

pub use error::{SonarError, SonarResult};
