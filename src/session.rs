//! One deployment, from configuration to a running scan.
//!
//! A [`Deployment`] is the explicit context threaded through startup: it owns the
//! validated settings and the output locations, resolves the serial port, and
//! hands a device to the [`ScanController`].

use crate::config::{Settings, SwitchParameters};
use crate::error::{SonarError, SonarResult};
use crate::instrument::{resolve_port, PortEnumerator, RetryPolicy, SerialDevice, SerialLink, Transactor};
use crate::scan::{deployment_dir, CancelFlag, FileSinks, ScanController, Terminal};
use std::fs::{self, File};
use std::future::Future;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Name of the validated parameter dump inside a deployment directory.
pub const CONFIG_JSON_FILE: &str = "config.json";

/// Where a deployment reads its configuration and writes its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentOptions {
    /// Deployment identifier used in file names.
    pub deployment: String,
    /// Configuration file.
    pub config_path: PathBuf,
    /// Root directory for `deployment_<id>/` data directories.
    pub data_dir: PathBuf,
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self {
            deployment: "01".to_string(),
            config_path: PathBuf::from("config.toml"),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// A configured deployment.
#[derive(Debug, Clone)]
pub struct Deployment {
    id: String,
    settings: Settings,
    data_root: PathBuf,
}

/// Log the opening line of a deployment log.
pub fn announce(deployment: &str) {
    info!(
        "Melt Stake 881A Sonar deployment log initialized - Deployment {} - {}",
        deployment,
        chrono::Utc::now().date_naive()
    );
}

/// Set `cancel` once `signal` resolves successfully.
///
/// Intended for `tokio::signal::ctrl_c()`; a failed signal registration is
/// logged and leaves the flag untouched.
pub async fn cancel_on<S>(signal: S, cancel: CancelFlag)
where
    S: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Interrupt received, stopping after the current step");
            cancel.cancel();
        }
        Err(e) => warn!("Unable to listen for interrupt: {}", e),
    }
}

impl Deployment {
    /// Load and validate the configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Config` when the file cannot be loaded.
    pub fn load(options: &DeploymentOptions) -> SonarResult<Self> {
        let settings = Settings::load_from(&options.config_path)?;
        Ok(Self::with_settings(&options.deployment, settings, &options.data_dir))
    }

    /// Deployment from settings that were already loaded.
    pub fn with_settings(id: &str, settings: Settings, data_root: &Path) -> Self {
        Self {
            id: id.to_string(),
            settings,
            data_root: data_root.to_path_buf(),
        }
    }

    /// Deployment identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Validated settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Directory holding this deployment's scan files and artifacts.
    pub fn data_dir(&self) -> PathBuf {
        deployment_dir(&self.data_root, &self.id)
    }

    /// Write the validated switch parameters as `config.json` for the offline converter.
    pub fn write_config_json(&self) -> SonarResult<PathBuf> {
        let dir = self.data_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join(CONFIG_JSON_FILE);
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.settings.params)?;
        info!("Switch parameters written to {}", path.display());
        Ok(path)
    }

    /// Resolve and open the serial port.
    ///
    /// # Errors
    ///
    /// Returns `Connection` when no port can be resolved or opened.
    pub fn connect<E: PortEnumerator + ?Sized>(&self, enumerator: &E) -> SonarResult<SerialLink> {
        let port = resolve_port(&self.settings.connection, enumerator)?;
        let transport = &self.settings.transport;
        SerialLink::open(&port, transport.baud_rate, transport.timeout()).map_err(|e| {
            SonarError::Connection(format!(
                "Failed to open serial port {:?} at {} baud: {}",
                port, transport.baud_rate, e
            ))
        })
    }

    /// Transactor configured from the transport settings.
    pub fn transactor(&self) -> Transactor {
        Transactor::new(RetryPolicy {
            retries: self.settings.transport.retries,
            backoff: self.settings.transport.backoff(),
        })
    }

    /// Build a controller writing scan files under the data directory.
    pub fn controller<D: SerialDevice>(
        &self,
        device: D,
        cancel: CancelFlag,
    ) -> SonarResult<ScanController<D, FileSinks>> {
        let sinks = FileSinks::new(&self.data_root, &self.id)?;
        Ok(ScanController::new(
            device,
            sinks,
            self.transactor(),
            self.params(),
            cancel,
        ))
    }

    /// Scan on `device` until `cancel` is set.
    pub fn run<D: SerialDevice>(&self, device: D, cancel: CancelFlag) -> SonarResult<Terminal> {
        self.write_config_json()?;
        let mut controller = self.controller(device, cancel)?;
        controller.run()
    }

    fn params(&self) -> SwitchParameters {
        self.settings.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfig;
    use crate::instrument::{PortCandidate, StaticPorts};
    use tracing_test::traced_test;

    fn deployment(root: &Path, toml: &str) -> Deployment {
        let settings = RawConfig::from_toml_str(toml).unwrap().validate();
        Deployment::with_settings("05", settings, root)
    }

    #[test]
    fn test_config_json_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let dep = deployment(root.path(), "[switch_cmd]\nsector_width = 30\n");
        let path = dep.write_config_json().unwrap();
        assert_eq!(path, root.path().join("deployment_05").join(CONFIG_JSON_FILE));

        let text = fs::read_to_string(path).unwrap();
        let params: SwitchParameters = serde_json::from_str(&text).unwrap();
        assert_eq!(params.sector_width, 30);
    }

    #[test]
    fn test_connect_without_match_is_connection_error() {
        let root = tempfile::tempdir().unwrap();
        let dep = deployment(root.path(), "[connection]\ndevice_name = \"imagenex\"\n");
        let ports = StaticPorts(vec![PortCandidate {
            path: "/dev/ttyS0".to_string(),
            description: None,
        }]);
        let err = dep.connect(&ports).unwrap_err();
        assert!(matches!(err, SonarError::Connection(_)));
    }

    #[test]
    #[traced_test]
    fn test_announce_line() {
        announce("12");
        assert!(logs_contain(&format!(
            "Melt Stake 881A Sonar deployment log initialized - Deployment 12 - {}",
            chrono::Utc::now().date_naive()
        )));
    }

    #[tokio::test]
    async fn test_cancel_on_signal() {
        let cancel = CancelFlag::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let watcher = tokio::spawn(cancel_on(
            async move { rx.await.map_err(|e| io::Error::new(io::ErrorKind::Other, e)) },
            cancel.clone(),
        ));
        assert!(!cancel.is_cancelled());

        tx.send(()).unwrap();
        watcher.await.unwrap();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_failed_signal_leaves_flag() {
        let cancel = CancelFlag::new();
        cancel_on(
            async { Err(io::Error::new(io::ErrorKind::Unsupported, "no signals")) },
            cancel.clone(),
        )
        .await;
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_transactor_uses_transport_settings() {
        let root = tempfile::tempdir().unwrap();
        let dep = deployment(root.path(), "[transport]\nretries = 1\nbackoff_ms = 20\n");
        let transactor = dep.transactor();
        assert_eq!(transactor.policy().retries, 1);
        assert_eq!(transactor.policy().backoff, std::time::Duration::from_millis(20));
    }
}
