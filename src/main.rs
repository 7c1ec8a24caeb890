//! Serial Collector - samples an Arduino's serial output into a CSV file
//!
//! Opens the configured serial port, shows incoming lines live, and saves
//! them when the run completes or is stopped with Ctrl+C.
//!
//! ## Configuration
//!
//! Settings come from environment variables, overridden by command-line flags:
//!
//! - `SERIAL_COLLECTOR_PORT` / `--port`: serial device (default: auto-select)
//! - `SERIAL_COLLECTOR_BAUD_RATE` / `--baud-rate`: baud rate (default: 115200)
//! - `SERIAL_COLLECTOR_DURATION_SECS` / `--duration`: collection time (default: 5)
//! - `SERIAL_COLLECTOR_SAMPLING_PERIOD_MS` / `--period`: sampling period (default: 4)
//! - `SERIAL_COLLECTOR_OUTPUT` / `--output`: CSV file name (default: data.csv)
//! - `RUST_LOG`: Logging level filter (default: info)

use std::io;
use std::path::Path;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use serial_collector::cli::Cli;
use serial_collector::collector::Collector;
use serial_collector::config::CollectionConfig;
use serial_collector::display::LiveView;
use serial_collector::link::PortConnector;
use serial_collector::persist::save_lines;
use serial_collector::ports::{list_ports, preferred_port};

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    let cli = Cli::parse();

    if cli.list_ports {
        print_ports();
        return;
    }

    // Load configuration from environment, then apply flags
    let config = match CollectionConfig::from_env().and_then(|base| cli.apply(base)) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let config = match resolve_port(config) {
        Some(config) => config,
        None => {
            error!("No serial ports found; connect the device or pass --port");
            std::process::exit(1);
        }
    };

    info!(
        port = %config.port,
        baud_rate = config.baud_rate,
        duration_secs = config.duration_secs,
        sampling_period_ms = config.sampling_period_ms,
        output = %config.output_file,
        "Configuration loaded"
    );

    let output = config.output_file.clone();
    let collector = Collector::new(PortConnector::new());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = match collector.begin(config, tx) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let mut view = if cli.quiet {
        LiveView::quiet(io::stdout(), cli.tail)
    } else {
        LiveView::new(io::stdout())
    };
    view.start(handle.target_count());

    // Render events until the worker drops its sender; Ctrl+C requests a stop
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stop_requested = false;

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        if let Err(e) = view.handle(&event) {
                            warn!(error = %e, "Failed to render event");
                        }
                    }
                    None => break,
                }
            }

            result = &mut ctrl_c, if !stop_requested => {
                stop_requested = true;
                match result {
                    Ok(()) => {
                        info!("Stop requested, finishing current read...");
                        handle.stop();
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to listen for stop signal");
                    }
                }
            }
        }
    }

    let outcome = handle.wait().await;

    // Whatever was collected gets saved, however the run ended
    let saved = save_lines(&outcome.lines, Path::new(&output));
    if let Err(e) = view.note(&saved.to_string()) {
        warn!(error = %e, "Failed to render save status");
    }

    if cli.json {
        let summary = serde_json::json!({
            "run": &outcome,
            "saved_to": saved.path(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => warn!(error = %e, "Failed to encode run summary"),
        }
    }

    if !outcome.reason.is_success() {
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
///
/// Logs go to stderr so stdout carries only the live view.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Print available ports, one per line.
fn print_ports() {
    match list_ports() {
        Ok(ports) if ports.is_empty() => println!("No serial ports found"),
        Ok(ports) => {
            for port in &ports {
                println!("{}", port);
            }
        }
        Err(e) => {
            error!(error = %e, "Error scanning ports");
            std::process::exit(1);
        }
    }
}

/// Fill in the port when none was configured, preferring USB adapters.
fn resolve_port(mut config: CollectionConfig) -> Option<CollectionConfig> {
    if !config.port.is_empty() {
        return Some(config);
    }

    let ports = match list_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!(error = %e, "Error scanning ports");
            return None;
        }
    };
    info!(count = ports.len(), "Found serial port(s)");

    let port = preferred_port(&ports)?;
    info!(port = %port, "Auto-selected serial port");
    config.port = port.device.clone();
    Some(config)
}
