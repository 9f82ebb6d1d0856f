//! Normalisation of the untyped configuration sections.
//!
//! Validation never fails. Every present-but-unusable value is replaced (by a
//! clamp into range or by the field default) and the replacement is recorded
//! as a [`ConfigCorrection`] and logged. Missing keys silently take their default.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;

/// Device name searched for when neither a port nor a device name is configured.
pub const DEFAULT_DEVICE_NAME: &str = "usbserial";

/// Validated switch command parameters. Every field is within its domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchParameters {
    /// Range setting, 1..=200.
    pub max_range: u8,
    /// Frequency code, 0..=200.
    pub freq: u8,
    /// Start gain, 0..=40.
    pub start_gain: u8,
    /// Log gain code, one of 0, 1, 2, 3.
    pub logf: u8,
    /// Absorption, 0..=255.
    pub absorption: u8,
    /// Train angle, 0..=120.
    pub train_angle: u8,
    /// Sector width, 0..=120.
    pub sector_width: u8,
    /// Step size in 0.3° units, 0..=8.
    pub step_size: u8,
    /// Pulse length, 1..=100.
    pub pulse_length: u8,
    /// Profile minimum range, 0..=250.
    pub min_range: u8,
    /// Data points per ping, 25 or 50.
    pub data_points: u8,
    /// Full sweeps per scan, 1..=10000.
    pub num_sweeps: u16,
}

impl Default for SwitchParameters {
    fn default() -> Self {
        Self {
            max_range: 1,
            freq: 165,
            start_gain: 18,
            logf: 0,
            absorption: 60,
            train_angle: 60,
            sector_width: 10,
            step_size: 1,
            pulse_length: 2,
            min_range: 0,
            data_points: 50,
            num_sweeps: 2,
        }
    }
}

/// Where to find the sonar. At least one field is set after validation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Explicit port path; bypasses discovery.
    pub port: Option<String>,
    /// Case-insensitive substring searched in enumerated port paths and descriptions.
    pub device_name: Option<String>,
}

/// One value the validator had to replace.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigCorrection {
    /// Configuration key.
    pub key: String,
    /// Why the raw value was rejected.
    pub reason: String,
    /// Value written into the validated record.
    pub replacement: String,
}

impl fmt::Display for ConfigCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Config '{}' invalid ({}); using {}",
            self.key, self.reason, self.replacement
        )
    }
}

/// Result of a validation pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Validated {
    /// Normalised connection section.
    pub connection: ConnectionSpec,
    /// Normalised switch parameters.
    pub params: SwitchParameters,
    /// Every correction applied, in order.
    pub corrections: Vec<ConfigCorrection>,
}

/// Validate the raw `connection` and `switch_cmd` sections.
pub fn validate(
    connection: &Map<String, Value>,
    switch_cmd: &Map<String, Value>,
) -> (ConnectionSpec, SwitchParameters) {
    let validated = validate_with_report(connection, switch_cmd);
    (validated.connection, validated.params)
}

/// Like [`validate`], also returning the list of corrections.
pub fn validate_with_report(
    connection: &Map<String, Value>,
    switch_cmd: &Map<String, Value>,
) -> Validated {
    let mut v = Validator::default();
    let connection = v.connection(connection);
    let params = v.switch_parameters(switch_cmd);
    Validated {
        connection,
        params,
        corrections: v.corrections,
    }
}

/// Coerce a raw value to an integer.
///
/// Booleans are rejected, integers pass, integral floats convert, strings parse
/// as base-10 after trimming. Anything else is rejected.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else if n.is_u64() {
                Some(i64::MAX)
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                s.parse::<i64>().ok()
            }
        }
        _ => None,
    }
}

fn norm_optional_str(value: Option<&Value>) -> Option<String> {
    let s = match value? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    };
    (!s.is_empty()).then_some(s)
}

#[derive(Default)]
struct Validator {
    corrections: Vec<ConfigCorrection>,
}

impl Validator {
    fn correct(&mut self, key: &str, reason: String, replacement: impl fmt::Debug) {
        let correction = ConfigCorrection {
            key: key.to_string(),
            reason,
            replacement: format!("{:?}", replacement),
        };
        warn!("{}", correction);
        self.corrections.push(correction);
    }

    fn connection(&mut self, raw: &Map<String, Value>) -> ConnectionSpec {
        let port = norm_optional_str(raw.get("port"));
        let mut device_name = norm_optional_str(raw.get("device_name"));

        if port.is_none() && device_name.is_none() {
            self.correct(
                "device_name",
                "both port and device_name missing/blank".to_string(),
                DEFAULT_DEVICE_NAME,
            );
            device_name = Some(DEFAULT_DEVICE_NAME.to_string());
        }

        ConnectionSpec { port, device_name }
    }

    /// Clamp an integer field into `[lo, hi]`, falling back to `default` when it is not an integer.
    fn clamp(&mut self, raw: &Map<String, Value>, key: &str, default: i64, lo: i64, hi: i64) -> i64 {
        let Some(value) = raw.get(key) else {
            return default;
        };
        let Some(n) = coerce_int(value) else {
            self.correct(key, format!("not an int: {}", value), default);
            return default;
        };
        let clamped = n.clamp(lo, hi);
        if clamped != n {
            self.correct(
                key,
                format!("{} outside [{}, {}]", n, lo, hi),
                clamped,
            );
        }
        clamped
    }

    /// A sweep count: zero or negative is not a count and takes the default,
    /// anything above `hi` is clamped.
    fn count(&mut self, raw: &Map<String, Value>, key: &str, default: i64, hi: i64) -> i64 {
        match raw.get(key).and_then(coerce_int) {
            Some(n) if n < 1 => {
                self.correct(key, format!("{} is not a positive count", n), default);
                default
            }
            _ => self.clamp(raw, key, default, 1, hi),
        }
    }

    /// Accept an integer field only if it is one of `allowed`.
    fn one_of(&mut self, raw: &Map<String, Value>, key: &str, default: i64, allowed: &[i64]) -> i64 {
        let Some(value) = raw.get(key) else {
            return default;
        };
        match coerce_int(value) {
            Some(n) if allowed.contains(&n) => n,
            _ => {
                self.correct(
                    key,
                    format!("must be one of {:?}; got {}", allowed, value),
                    default,
                );
                default
            }
        }
    }

    fn switch_parameters(&mut self, raw: &Map<String, Value>) -> SwitchParameters {
        let d = SwitchParameters::default();

        // Domains fit the target integer types, so the narrowing below is lossless.
        let byte = |v: &mut Self, key: &str, default: u8, lo: i64, hi: i64| -> u8 {
            v.clamp(raw, key, i64::from(default), lo, hi) as u8
        };

        SwitchParameters {
            num_sweeps: self.count(raw, "num_sweeps", i64::from(d.num_sweeps), 10_000) as u16,
            max_range: byte(self, "max_range", d.max_range, 1, 200),
            freq: byte(self, "freq", d.freq, 0, 200),
            start_gain: byte(self, "start_gain", d.start_gain, 0, 40),
            absorption: byte(self, "absorption", d.absorption, 0, 255),
            train_angle: byte(self, "train_angle", d.train_angle, 0, 120),
            sector_width: byte(self, "sector_width", d.sector_width, 0, 120),
            step_size: byte(self, "step_size", d.step_size, 0, 8),
            pulse_length: byte(self, "pulse_length", d.pulse_length, 1, 100),
            min_range: byte(self, "min_range", d.min_range, 0, 250),
            logf: self.one_of(raw, "logf", i64::from(d.logf), &[0, 1, 2, 3]) as u8,
            data_points: self.one_of(raw, "data_points", i64::from(d.data_points), &[25, 50]) as u8,
        }
    }
}
