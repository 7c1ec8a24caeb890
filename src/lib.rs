//! Serial Collector Library
//!
//! This library collects lines of text from a serial device (typically an
//! Arduino) at a fixed sampling cadence and saves them as CSV:
//!
//! - **config**: Collection settings from the environment or raw text fields
//! - **link**: Serial connection seam and the `serialport`-backed implementation
//! - **ports**: Enumeration of available serial ports
//! - **collector**: The sampling loop, run handles and progress events
//! - **persist**: Garbled-header filtering and CSV output
//! - **display**: Bounded scrollback and a terminal live view
//! - **cli**: Command-line flags for the binary
//!
//! # Example
//!
//! ```no_run
//! use serial_collector::collector::Collector;
//! use serial_collector::config::CollectionConfig;
//! use serial_collector::link::PortConnector;
//! use serial_collector::persist::save_lines;
//! use std::path::Path;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = CollectionConfig::from_env().expect("Failed to load config");
//!     let output = config.output_file.clone();
//!
//!     let collector = Collector::new(PortConnector::new());
//!     let (tx, _rx) = mpsc::unbounded_channel();
//!     let handle = collector.begin(config, tx).expect("Invalid configuration");
//!
//!     let outcome = handle.wait().await;
//!     println!("{}", save_lines(&outcome.lines, Path::new(&output)));
//! }
//! ```

// Module declarations
pub mod cli;
pub mod collector;
pub mod config;
pub mod display;
pub mod link;
pub mod persist;
pub mod ports;

// Re-export commonly used types at crate root for convenience
pub use collector::{
    Collector, CollectorEvent, CollectorTiming, FinishReason, RunHandle, RunObserver, RunOutcome,
    StopSignal,
};
pub use config::{CollectionConfig, ConfigError};
pub use display::{LiveView, Scrollback};
pub use link::{Connector, PortConnector, SerialLink};
pub use persist::{save_lines, SaveOutcome};
pub use ports::{list_ports, preferred_port, PortInfo};
