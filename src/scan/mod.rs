//! Scanning session: the sweep-tracking controller and its per-scan data sinks.

pub mod controller;
pub mod sink;

pub use controller::{CancelFlag, ControllerState, ScanController, ScanState, Terminal};
pub use sink::{deployment_dir, scan_file_name, DataSink, FileSinks, MemorySinks, SinkFactory};
#[cfg(feature = "storage_csv")]
pub use sink::{RunIndex, RunIndexEntry, RUN_INDEX_FILE};
