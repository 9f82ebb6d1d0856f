//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config.toml` by default)
//! 2. environment variables prefixed with `MELTSTAKE_`, nested keys split on `__`
//!
//! ```text
//! MELTSTAKE_CONNECTION__PORT=/dev/ttyUSB0
//! MELTSTAKE_SWITCH_CMD__NUM_SWEEPS=4
//! MELTSTAKE_TRANSPORT__RETRIES=5
//! ```
//!
//! The `[connection]` and `[switch_cmd]` sections are deliberately kept untyped
//! and only cross into the rest of the crate through [`validate`], which turns
//! them into [`ConnectionSpec`] and [`SwitchParameters`]. The `[transport]`
//! section is a plain serde struct with defaults.

mod validate;

pub use validate::{
    coerce_int, validate, validate_with_report, ConfigCorrection, ConnectionSpec,
    SwitchParameters, Validated, DEFAULT_DEVICE_NAME,
};

use crate::error::SonarResult;
use crate::protocol::DEFAULT_BAUD_RATE;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "MELTSTAKE_";

/// Raw configuration as read from the file and environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawConfig {
    /// Untyped `[connection]` section.
    #[serde(default)]
    pub connection: Map<String, Value>,
    /// Untyped `[switch_cmd]` section.
    #[serde(default)]
    pub switch_cmd: Map<String, Value>,
    /// Serial link tuning.
    #[serde(default)]
    pub transport: TransportSettings,
}

/// Serial link settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Link speed.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Device read/write deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after the first failed attempt of a transaction.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Fixed pause between attempts in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl TransportSettings {
    /// Device read deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Pause between transaction attempts.
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    150
}

/// Fully validated settings for one deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Where to find the sonar.
    pub connection: ConnectionSpec,
    /// Switch command parameters.
    pub params: SwitchParameters,
    /// Serial link tuning.
    pub transport: TransportSettings,
    /// Corrections applied by validation.
    pub corrections: Vec<ConfigCorrection>,
}

impl RawConfig {
    /// Load from a TOML file merged with `MELTSTAKE_` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when the file is missing or not valid TOML, or
    /// when the `[transport]` section does not deserialize.
    pub fn load_from<P: AsRef<Path>>(path: P) -> SonarResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(figment::Error::from(format!(
                "Failed to load configuration file at {}: not found",
                path.display()
            ))
            .into());
        }
        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        info!("Configuration file loaded: {}", path.display());
        Ok(config)
    }

    /// Parse from a TOML string, without environment overrides.
    pub fn from_toml_str(toml: &str) -> SonarResult<Self> {
        Ok(Figment::new().merge(Toml::string(toml)).extract()?)
    }

    /// Run the validator over the untyped sections.
    pub fn validate(&self) -> Settings {
        let validated = validate_with_report(&self.connection, &self.switch_cmd);
        Settings {
            connection: validated.connection,
            params: validated.params,
            transport: self.transport,
            corrections: validated.corrections,
        }
    }
}

impl Settings {
    /// Load and validate in one step.
    pub fn load_from<P: AsRef<Path>>(path: P) -> SonarResult<Self> {
        Ok(RawConfig::load_from(path)?.validate())
    }
}
