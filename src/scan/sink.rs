//! Per-scan data sinks.
//!
//! Each scan segment gets its own byte-appendable sink, opened when the scan
//! starts and closed at the scan boundary. Raw response frames are appended
//! verbatim so the archive can be decoded later with the same byte layout.

use crate::error::{SonarError, SonarResult};
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

/// An open data sink.
pub type DataSink = Box<dyn Write + Send>;

/// Opens one sink per scan index.
pub trait SinkFactory {
    /// Open (creating if needed) the sink for `scan_index`.
    ///
    /// # Errors
    ///
    /// Returns `DataSink` when the sink cannot be created.
    fn open(&mut self, scan_index: u32) -> SonarResult<DataSink>;
}

/// File sinks laid out as `<root>/deployment_<id>/scan_<n>.dat`.
///
/// Opening a sink also appends a `scan` row to the deployment run index when
/// CSV support is compiled in.
#[derive(Debug, Clone)]
pub struct FileSinks {
    dir: PathBuf,
}

impl FileSinks {
    /// Sinks for `deployment` under `root`, creating the directory.
    pub fn new(root: &Path, deployment: &str) -> SonarResult<Self> {
        let dir = deployment_dir(root, deployment);
        fs::create_dir_all(&dir).map_err(|e| {
            SonarError::DataSink(format!("failed to create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    /// Deployment directory holding the scan files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file for `scan_index`.
    pub fn scan_path(&self, scan_index: u32) -> PathBuf {
        self.dir.join(scan_file_name(scan_index))
    }
}

impl SinkFactory for FileSinks {
    fn open(&mut self, scan_index: u32) -> SonarResult<DataSink> {
        let path = self.scan_path(scan_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                SonarError::DataSink(format!("failed to create data file at {}: {}", path.display(), e))
            })?;
        info!("Data file created at {}", path.display());

        #[cfg(feature = "storage_csv")]
        RunIndex::new(&self.dir)
            .append("scan", &scan_file_name(scan_index))
            .map_err(|e| {
                SonarError::DataSink(format!("failed to index {}: {}", path.display(), e))
            })?;

        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Directory for one deployment's data.
pub fn deployment_dir(root: &Path, deployment: &str) -> PathBuf {
    root.join(format!("deployment_{}", deployment))
}

/// File name of one scan segment.
pub fn scan_file_name(scan_index: u32) -> String {
    format!("scan_{}.dat", scan_index)
}

/// In-memory sinks, one shared buffer per opened scan.
///
/// Clones share the same buffers, so a test can keep one handle and hand the
/// other to the controller.
#[derive(Debug, Clone, Default)]
pub struct MemorySinks {
    scans: Arc<Mutex<Vec<(u32, Arc<Mutex<Vec<u8>>>)>>>,
}

impl MemorySinks {
    /// Create an empty set of sinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan indices in the order they were opened.
    pub fn opened(&self) -> Vec<u32> {
        self.scans
            .lock()
            .map(|scans| scans.iter().map(|(i, _)| *i).collect())
            .unwrap_or_default()
    }

    /// Bytes written to the sink for `scan_index`, if it was opened.
    pub fn contents(&self, scan_index: u32) -> Option<Vec<u8>> {
        let scans = self.scans.lock().ok()?;
        let (_, buf) = scans.iter().find(|(i, _)| *i == scan_index)?;
        let data = buf.lock().ok()?.clone();
        Some(data)
    }
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "buffer lock poisoned"))?
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SinkFactory for MemorySinks {
    fn open(&mut self, scan_index: u32) -> SonarResult<DataSink> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        self.scans
            .lock()
            .map_err(|_| SonarError::DataSink("sink registry lock poisoned".to_string()))?
            .push((scan_index, Arc::clone(&buffer)));
        Ok(Box::new(SharedBuffer(buffer)))
    }
}

#[cfg(feature = "storage_csv")]
pub use run_index::{RunIndex, RunIndexEntry, RUN_INDEX_FILE};

#[cfg(feature = "storage_csv")]
mod run_index {
    use super::*;
    use serde::{Deserialize, Serialize};

    /// Name of the run index inside a deployment directory.
    pub const RUN_INDEX_FILE: &str = "RunIndex.csv";

    /// One archived file and what kind of records it holds.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RunIndexEntry {
        /// `scan`, `downward` or `orientation`.
        #[serde(rename = "Type")]
        pub kind: String,
        /// File name relative to the deployment directory.
        #[serde(rename = "File")]
        pub file: String,
    }

    /// `RunIndex.csv` of a deployment directory.
    #[derive(Debug, Clone)]
    pub struct RunIndex {
        path: PathBuf,
    }

    impl RunIndex {
        /// Run index inside `dir`.
        pub fn new(dir: &Path) -> Self {
            Self {
                path: dir.join(RUN_INDEX_FILE),
            }
        }

        /// Path of the index file.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Append a row, writing the header first if the file is new or empty.
        pub fn append(&self, kind: &str, file: &str) -> SonarResult<()> {
            let needs_header = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
            let handle = OpenOptions::new().create(true).append(true).open(&self.path)?;
            let mut writer = csv::WriterBuilder::new()
                .has_headers(needs_header)
                .from_writer(handle);
            writer.serialize(RunIndexEntry {
                kind: kind.to_string(),
                file: file.to_string(),
            })?;
            writer.flush()?;
            Ok(())
        }

        /// Read all rows.
        pub fn entries(&self) -> SonarResult<Vec<RunIndexEntry>> {
            let mut reader = csv::Reader::from_path(&self.path)?;
            let mut entries = Vec::new();
            for row in reader.deserialize() {
                entries.push(row?);
            }
            Ok(entries)
        }
    }

}
