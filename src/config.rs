//! Configuration module for a serial collection run.
//!
//! A `CollectionConfig` names the device, the baud rate, how long to collect
//! and how often to sample, plus the CSV file the lines end up in. It can be
//! loaded from environment variables, built from raw text fields, or
//! constructed directly.

use std::env;
use std::str::FromStr;

use tracing::warn;

/// Default baud rate used by the lab sketches
const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default collection duration in seconds
const DEFAULT_DURATION_SECS: f64 = 5.0;

/// Default sampling period in milliseconds
const DEFAULT_SAMPLING_PERIOD_MS: f64 = 4.0;

/// Default output file name
const DEFAULT_OUTPUT_FILE: &str = "data.csv";

/// Maximum number of samples per run, to keep the line buffer bounded
pub const MAX_TARGET_COUNT: u64 = 10_000_000;

/// Baud rates offered to users; anything else is accepted with a warning.
pub const STANDARD_BAUD_RATES: &[u32] = &[9_600, 19_200, 38_400, 57_600, 115_200];

const PORT_VAR: &str = "SERIAL_COLLECTOR_PORT";
const BAUD_RATE_VAR: &str = "SERIAL_COLLECTOR_BAUD_RATE";
const DURATION_VAR: &str = "SERIAL_COLLECTOR_DURATION_SECS";
const SAMPLING_PERIOD_VAR: &str = "SERIAL_COLLECTOR_SAMPLING_PERIOD_MS";
const OUTPUT_VAR: &str = "SERIAL_COLLECTOR_OUTPUT";

/// Configuration for one collection run.
///
/// Environment variables understood by [`CollectionConfig::from_env`]:
/// - `SERIAL_COLLECTOR_PORT`: device name, e.g. `/dev/ttyACM0` or `COM3` (default: empty)
/// - `SERIAL_COLLECTOR_BAUD_RATE`: baud rate (default: 115200)
/// - `SERIAL_COLLECTOR_DURATION_SECS`: total collection time (default: 5)
/// - `SERIAL_COLLECTOR_SAMPLING_PERIOD_MS`: time between samples (default: 4)
/// - `SERIAL_COLLECTOR_OUTPUT`: CSV file name (default: data.csv)
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionConfig {
    /// Platform device name of the serial port
    pub port: String,

    /// Serial line speed
    pub baud_rate: u32,

    /// Total collection time in seconds
    pub duration_secs: f64,

    /// Minimum time between two accepted samples, in milliseconds
    pub sampling_period_ms: f64,

    /// Name of the CSV file written after the run
    pub output_file: String,
}

/// Error type for configuration loading and validation failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
    pub field: Option<String>,
}

impl ConfigError {
    fn for_field(field: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "Configuration error for {}: {}", field, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl CollectionConfig {
    /// Create a configuration from already-typed values.
    ///
    /// No validation happens here; call [`CollectionConfig::validate`] or let
    /// the collector do it when the run begins.
    pub fn new(
        port: impl Into<String>,
        baud_rate: u32,
        duration_secs: f64,
        sampling_period_ms: f64,
        output_file: impl Into<String>,
    ) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            duration_secs,
            sampling_period_ms,
            output_file: output_file.into(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to defaults. The result is validated.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the variable if a value cannot be parsed,
    /// is not positive, or the derived sample count is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env::var(PORT_VAR).unwrap_or_default().trim().to_string();
        let baud_rate = read_var(BAUD_RATE_VAR, DEFAULT_BAUD_RATE)?;
        let duration_secs = read_var(DURATION_VAR, DEFAULT_DURATION_SECS)?;
        let sampling_period_ms = read_var(SAMPLING_PERIOD_VAR, DEFAULT_SAMPLING_PERIOD_MS)?;
        let output_file = env::var(OUTPUT_VAR)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_OUTPUT_FILE.to_string());

        let config = Self {
            port,
            baud_rate,
            duration_secs,
            sampling_period_ms,
            output_file,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from raw text fields, as typed into a form.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any numeric field is unparsable or
    /// non-positive, or if the derived sample count is zero.
    pub fn parse(
        port: &str,
        baud_rate: &str,
        duration_secs: &str,
        sampling_period_ms: &str,
        output_file: &str,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            port: port.trim().to_string(),
            baud_rate: parse_field("baud_rate", baud_rate)?,
            duration_secs: parse_field("duration_secs", duration_secs)?,
            sampling_period_ms: parse_field("sampling_period_ms", sampling_period_ms)?,
            output_file: output_file.trim().to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Number of data samples requested, excluding the header allowance.
    ///
    /// `floor(duration * 1000 / period)`; zero when the inputs are not
    /// positive finite numbers.
    pub fn target_count(&self) -> u64 {
        let samples = (self.duration_secs * 1000.0 / self.sampling_period_ms).floor();
        if samples.is_finite() && samples > 0.0 {
            samples as u64
        } else {
            0
        }
    }

    /// Check every field and return the derived target count.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for a zero baud rate, a non-positive or
    /// non-finite duration or period, an empty output file name, or a
    /// target count of zero or above `MAX_TARGET_COUNT`.
    pub fn validate(&self) -> Result<u64, ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::for_field(
                "baud_rate",
                "baud rate must be greater than 0",
            ));
        }
        if !STANDARD_BAUD_RATES.contains(&self.baud_rate) {
            warn!(baud_rate = self.baud_rate, "Non-standard baud rate");
        }

        ensure_positive("duration_secs", self.duration_secs)?;
        ensure_positive("sampling_period_ms", self.sampling_period_ms)?;

        if self.output_file.trim().is_empty() {
            return Err(ConfigError::for_field(
                "output_file",
                "output file name must not be empty",
            ));
        }

        match self.target_count() {
            0 => Err(ConfigError {
                message: format!(
                    "number of samples must be greater than 0 ({}s at {}ms per sample)",
                    self.duration_secs, self.sampling_period_ms
                ),
                field: None,
            }),
            count if count > MAX_TARGET_COUNT => Err(ConfigError {
                message: format!(
                    "number of samples {} exceeds maximum allowed ({})",
                    count, MAX_TARGET_COUNT
                ),
                field: None,
            }),
            count => Ok(count),
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            duration_secs: DEFAULT_DURATION_SECS,
            sampling_period_ms: DEFAULT_SAMPLING_PERIOD_MS,
            output_file: DEFAULT_OUTPUT_FILE.to_string(),
        }
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn read_var<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => parse_field(var, &value),
        Err(_) => Ok(default),
    }
}

fn parse_field<T: FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::for_field(field, format!("'{}' is not a valid number", value)))
}

fn ensure_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::for_field(
            field,
            format!("{} must be a positive number", value),
        ))
    }
}
