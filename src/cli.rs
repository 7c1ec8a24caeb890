//! Command-line arguments for the collector binary.
//!
//! Every collection setting can also come from the environment (see
//! [`CollectionConfig::from_env`]); flags given here take precedence.

use clap::Parser;

use crate::config::{CollectionConfig, ConfigError};

/// Collect lines from a serial device into a CSV file.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "serial-collector")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// List available serial ports and exit.
    #[arg(long)]
    pub list_ports: bool,

    /// Serial device, e.g. /dev/ttyACM0 or COM3. Auto-selected if omitted.
    #[arg(short = 'p', long)]
    pub port: Option<String>,

    /// Baud rate (9600, 19200, 38400, 57600 or 115200 are standard).
    #[arg(short = 'b', long)]
    pub baud_rate: Option<u32>,

    /// Total collection time in seconds.
    #[arg(short = 'd', long)]
    pub duration: Option<f64>,

    /// Sampling period in milliseconds.
    #[arg(short = 's', long)]
    pub period: Option<f64>,

    /// Output CSV file name.
    #[arg(short = 'o', long)]
    pub output: Option<String>,

    /// Print the run summary as JSON after saving.
    #[arg(long)]
    pub json: bool,

    /// Show progress every 10% instead of every line, then the last lines.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Number of recent lines printed at the end of a quiet run.
    #[arg(long, default_value_t = DEFAULT_TAIL_LINES, requires = "quiet")]
    pub tail: usize,
}

/// Lines shown after a quiet run when `--tail` is not given.
pub const DEFAULT_TAIL_LINES: usize = 10;

impl Default for Cli {
    fn default() -> Self {
        Self {
            list_ports: false,
            port: None,
            baud_rate: None,
            duration: None,
            period: None,
            output: None,
            json: false,
            quiet: false,
            tail: DEFAULT_TAIL_LINES,
        }
    }
}

impl Cli {
    /// Apply the flags that were given on top of `base` and validate the result.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the combined configuration is invalid.
    pub fn apply(&self, base: CollectionConfig) -> Result<CollectionConfig, ConfigError> {
        let mut config = base;

        if let Some(port) = &self.port {
            config.port = port.trim().to_string();
        }
        if let Some(baud_rate) = self.baud_rate {
            config.baud_rate = baud_rate;
        }
        if let Some(duration) = self.duration {
            config.duration_secs = duration;
        }
        if let Some(period) = self.period {
            config.sampling_period_ms = period;
        }
        if let Some(output) = &self.output {
            config.output_file = output.trim().to_string();
        }

        config.validate()?;
        Ok(config)
    }
}
