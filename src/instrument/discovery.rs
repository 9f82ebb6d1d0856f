//! Serial port resolution.
//!
//! An explicit port always wins. Otherwise the configured device name is
//! matched, case-insensitively, as a substring of each candidate's path or
//! description; the first match is used.

use crate::config::ConnectionSpec;
use crate::error::{SonarError, SonarResult};
use tracing::{debug, error, info};

/// A serial port reported by the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub path: String,
    /// Human readable description, if the platform reports one.
    pub description: Option<String>,
}

impl PortCandidate {
    fn matches(&self, needle: &str) -> bool {
        self.path.to_lowercase().contains(needle)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(needle))
    }
}

/// Source of candidate ports.
pub trait PortEnumerator {
    /// List the ports currently present.
    fn candidates(&self) -> SonarResult<Vec<PortCandidate>>;
}

/// Fixed list of candidates, for tests and for callers that already enumerated.
#[derive(Debug, Clone, Default)]
pub struct StaticPorts(pub Vec<PortCandidate>);

impl PortEnumerator for StaticPorts {
    fn candidates(&self) -> SonarResult<Vec<PortCandidate>> {
        Ok(self.0.clone())
    }
}

/// Ports enumerated by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

#[cfg(feature = "instrument_serial")]
impl PortEnumerator for SystemPorts {
    fn candidates(&self) -> SonarResult<Vec<PortCandidate>> {
        use serialport::SerialPortType;

        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|p| {
                let description = match p.port_type {
                    SerialPortType::UsbPort(info) => {
                        let parts: Vec<String> =
                            [info.manufacturer, info.product].into_iter().flatten().collect();
                        (!parts.is_empty()).then(|| parts.join(" "))
                    }
                    SerialPortType::BluetoothPort => Some("Bluetooth".to_string()),
                    SerialPortType::PciPort => Some("PCI".to_string()),
                    SerialPortType::Unknown => None,
                };
                PortCandidate {
                    path: p.port_name,
                    description,
                }
            })
            .collect())
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl PortEnumerator for SystemPorts {
    fn candidates(&self) -> SonarResult<Vec<PortCandidate>> {
        Err(SonarError::FeatureNotEnabled("instrument_serial".to_string()))
    }
}

/// Resolve the port to open for `connection`.
///
/// # Errors
///
/// Returns `Connection` when no port is configured and no candidate matches.
pub fn resolve_port<E: PortEnumerator + ?Sized>(
    connection: &ConnectionSpec,
    enumerator: &E,
) -> SonarResult<String> {
    if let Some(port) = connection.port.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        debug!("Using configured port {:?}", port);
        return Ok(port.to_string());
    }

    if let Some(name) = connection.device_name.as_deref() {
        let needle = name.trim().to_lowercase();
        if !needle.is_empty() {
            let candidates = enumerator.candidates()?;
            debug!("Searching {} port(s) for {:?}", candidates.len(), needle);
            if let Some(found) = candidates.into_iter().find(|c| c.matches(&needle)) {
                info!("Auto-detected {:?} on {}", name, found.path);
                return Ok(found.path);
            }
        }
    }

    error!("No serial port provided and auto-detection failed");
    Err(SonarError::Connection(
        "No serial port provided and auto-detection failed".to_string(),
    ))
}
