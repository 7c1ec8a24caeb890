//! Collector module: the sampling loop that turns a serial stream into lines.
//!
//! A run opens the configured port, waits for the first non-empty line, then
//! accepts at most one line per sampling period until `target_count + 1`
//! lines have arrived or the run is stopped. The extra line is the header or
//! identifier the device usually prints when the stream starts.
//!
//! The loop runs on a blocking worker thread. Progress flows back to the
//! caller through a [`RunObserver`], normally an unbounded channel of
//! [`CollectorEvent`]s, and the caller cancels through a [`StopSignal`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{CollectionConfig, ConfigError};
use crate::link::{decode_line, Connector, SerialLink};

/// Read timeout applied to the serial connection.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// How long to wait for the device to start talking.
const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for the first line.
const DEFAULT_FIRST_LINE_POLL: Duration = Duration::from_millis(10);

/// Sleep between steady-state checks.
const DEFAULT_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Timing knobs for the sampling loop.
#[derive(Debug, Clone)]
pub struct CollectorTiming {
    /// Read timeout configured on the connection
    pub read_timeout: Duration,

    /// Maximum wait for the first non-empty line
    pub data_timeout: Duration,

    /// Poll interval during first-line acquisition
    pub first_line_poll: Duration,

    /// Sleep between checks during steady-state collection
    pub idle_sleep: Duration,
}

impl Default for CollectorTiming {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            data_timeout: DEFAULT_DATA_TIMEOUT,
            first_line_poll: DEFAULT_FIRST_LINE_POLL,
            idle_sleep: DEFAULT_IDLE_SLEEP,
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FinishReason {
    /// `target_count + 1` lines were collected
    Completed,

    /// The stop signal was raised before the run completed
    StoppedEarly,

    /// The serial port could not be opened
    ConnectionFailed(String),

    /// The port opened but no line arrived within the data timeout
    NoDataTimeout,

    /// An I/O failure after the port was opened
    RuntimeError(String),
}

impl FinishReason {
    /// Whether the run ended without a failure.
    pub fn is_success(&self) -> bool {
        matches!(self, FinishReason::Completed | FinishReason::StoppedEarly)
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Completed => write!(f, "completed"),
            FinishReason::StoppedEarly => write!(f, "stopped early"),
            FinishReason::ConnectionFailed(e) => write!(f, "connection failed: {}", e),
            FinishReason::NoDataTimeout => write!(f, "no data received"),
            FinishReason::RuntimeError(e) => write!(f, "runtime error: {}", e),
        }
    }
}

/// Notification posted by the sampling loop.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectorEvent {
    /// Free-form status text
    Status(String),

    /// A line was accepted; `current` is capped at `target` for display
    LineReceived {
        line: String,
        current: u64,
        target: u64,
    },

    /// The run ended
    Finished { reason: FinishReason, target: u64 },
}

/// Receiver of progress notifications from the sampling loop.
///
/// Implementations must not block; the loop calls them inline.
pub trait RunObserver: Send + 'static {
    fn on_status(&self, text: &str);

    fn on_line_received(&self, line: &str, current: u64, target: u64);

    fn on_finished(&self, reason: &FinishReason, target: u64);
}

impl RunObserver for mpsc::UnboundedSender<CollectorEvent> {
    // A closed receiver only means nobody is watching any more
    fn on_status(&self, text: &str) {
        let _ = self.send(CollectorEvent::Status(text.to_string()));
    }

    fn on_line_received(&self, line: &str, current: u64, target: u64) {
        let _ = self.send(CollectorEvent::LineReceived {
            line: line.to_string(),
            current,
            target,
        });
    }

    fn on_finished(&self, reason: &FinishReason, target: u64) {
        let _ = self.send(CollectorEvent::Finished {
            reason: reason.clone(),
            target,
        });
    }
}

/// Cooperative cancellation flag shared between the caller and a run.
///
/// Starts active; [`StopSignal::stop`] clears it once and for all.
#[derive(Debug, Clone)]
pub struct StopSignal {
    active: Arc<AtomicBool>,
}

impl StopSignal {
    fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Ask the run to stop at its next loop boundary.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Returns true until a stop has been requested.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub reason: FinishReason,
    pub target_count: u64,

    /// Received lines in arrival order, including the header line
    pub lines: Vec<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    /// Number of data samples, not counting the header line.
    pub fn data_samples(&self) -> usize {
        self.lines.len().saturating_sub(1)
    }
}

/// Handle to a run started by [`Collector::begin`].
pub struct RunHandle {
    run_id: Uuid,
    target_count: u64,
    started_at: DateTime<Utc>,
    signal: StopSignal,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn target_count(&self) -> u64 {
        self.target_count
    }

    /// Ask the run to stop. Advisory: an in-flight read finishes first.
    pub fn stop(&self) {
        self.signal.stop();
    }

    /// A clone of the run's stop signal, for handing to another task.
    pub fn stop_signal(&self) -> StopSignal {
        self.signal.clone()
    }

    /// Wait for the worker to finish and return what it collected.
    ///
    /// A panicked worker is reported as a `RuntimeError` with no lines.
    pub async fn wait(self) -> RunOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "Collection worker panicked");
                RunOutcome {
                    run_id: self.run_id,
                    reason: FinishReason::RuntimeError(e.to_string()),
                    target_count: self.target_count,
                    lines: Vec::new(),
                    started_at: self.started_at,
                    finished_at: Utc::now(),
                }
            }
        }
    }
}

/// Drives collection runs against serial links opened by a [`Connector`].
///
/// # Example
///
/// ```no_run
/// use serial_collector::collector::{Collector, CollectorEvent};
/// use serial_collector::config::CollectionConfig;
/// use serial_collector::link::PortConnector;
/// use tokio::sync::mpsc;
///
/// #[tokio::main]
/// async fn main() {
///     let collector = Collector::new(PortConnector::new());
///     let config = CollectionConfig::new("/dev/ttyACM0", 115_200, 5.0, 4.0, "data.csv");
///
///     let (tx, mut rx) = mpsc::unbounded_channel();
///     let handle = collector.begin(config, tx).expect("Invalid configuration");
///
///     while let Some(event) = rx.recv().await {
///         if let CollectorEvent::LineReceived { line, current, target } = event {
///             println!("[{}/{}] {}", current, target, line);
///         }
///     }
///
///     let outcome = handle.wait().await;
///     println!("{} lines, {}", outcome.lines.len(), outcome.reason);
/// }
/// ```
pub struct Collector {
    connector: Arc<dyn Connector>,
    timing: CollectorTiming,
}

impl Collector {
    /// Create a collector with default timing.
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::with_timing(connector, CollectorTiming::default())
    }

    /// Create a collector with explicit timing.
    pub fn with_timing(connector: impl Connector + 'static, timing: CollectorTiming) -> Self {
        Self {
            connector: Arc::new(connector),
            timing,
        }
    }

    pub fn timing(&self) -> &CollectorTiming {
        &self.timing
    }

    /// Validate `config` and start a run on a blocking worker.
    ///
    /// Returns immediately; progress arrives through `observer`. Must be
    /// called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid. No I/O happens
    /// in that case.
    pub fn begin(
        &self,
        config: CollectionConfig,
        observer: impl RunObserver,
    ) -> Result<RunHandle, ConfigError> {
        let target_count = config.validate()?;

        let run = SamplingRun {
            run_id: Uuid::new_v4(),
            config,
            target_count,
            timing: self.timing.clone(),
            signal: StopSignal::new(),
            lines: Vec::new(),
            started_at: Utc::now(),
        };

        info!(
            run_id = %run.run_id,
            port = %run.config.port,
            baud_rate = run.config.baud_rate,
            target_count = target_count,
            sampling_period_ms = run.config.sampling_period_ms,
            "Starting collection run"
        );

        let run_id = run.run_id;
        let started_at = run.started_at;
        let signal = run.signal.clone();
        let connector = self.connector.clone();
        let task = tokio::task::spawn_blocking(move || run.execute(connector.as_ref(), &observer));

        Ok(RunHandle {
            run_id,
            target_count,
            started_at,
            signal,
            task,
        })
    }
}

/// State owned by the worker for one run.
struct SamplingRun {
    run_id: Uuid,
    config: CollectionConfig,
    target_count: u64,
    timing: CollectorTiming,
    signal: StopSignal,
    lines: Vec<String>,
    started_at: DateTime<Utc>,
}

impl SamplingRun {
    fn execute(mut self, connector: &dyn Connector, observer: &dyn RunObserver) -> RunOutcome {
        let reason = self.collect(connector, observer);

        match &reason {
            FinishReason::Completed | FinishReason::StoppedEarly => info!(
                run_id = %self.run_id,
                reason = %reason,
                lines = self.lines.len(),
                "Collection run finished"
            ),
            _ => warn!(
                run_id = %self.run_id,
                reason = %reason,
                lines = self.lines.len(),
                "Collection run failed"
            ),
        }

        // The link was dropped inside `collect`, so the port is already closed
        observer.on_finished(&reason, self.target_count);

        RunOutcome {
            run_id: self.run_id,
            reason,
            target_count: self.target_count,
            lines: self.lines,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }

    fn collect(&mut self, connector: &dyn Connector, observer: &dyn RunObserver) -> FinishReason {
        observer.on_status("Establishing connection...");

        let mut link = match connector.open(
            &self.config.port,
            self.config.baud_rate,
            self.timing.read_timeout,
        ) {
            Ok(link) => link,
            Err(e) => {
                observer.on_status("Error: Could not open serial port");
                return FinishReason::ConnectionFailed(e.to_string());
            }
        };

        observer.on_status("Connection established. Waiting for data...");

        let reason = match self.acquire_first_line(link.as_mut()) {
            Ok(Some(first)) => {
                debug!(run_id = %self.run_id, line = %first, "First line received");
                self.lines.push(first.clone());
                observer.on_status("Connection established. Collecting data...");
                observer.on_line_received(&first, 1, self.target_count);

                match self.sample(link.as_mut(), observer) {
                    Ok(reason) => reason,
                    Err(e) => FinishReason::RuntimeError(e.to_string()),
                }
            }
            Ok(None) if !self.signal.is_active() => FinishReason::StoppedEarly,
            Ok(None) => {
                observer.on_status("Error: No incoming data from device");
                FinishReason::NoDataTimeout
            }
            Err(e) => FinishReason::RuntimeError(e.to_string()),
        };

        drop(link);

        if let FinishReason::RuntimeError(detail) = &reason {
            observer.on_status(&format!("Error: {}", detail));
        }

        reason
    }

    /// Poll until a non-empty line arrives, the data timeout elapses, or the
    /// run is stopped.
    fn acquire_first_line(&self, link: &mut dyn SerialLink) -> std::io::Result<Option<String>> {
        let started = Instant::now();

        while started.elapsed() < self.timing.data_timeout && self.signal.is_active() {
            if link.bytes_waiting()? > 0 {
                let line = decode_line(&link.read_line()?);
                if !line.is_empty() {
                    return Ok(Some(line));
                }
            }
            std::thread::sleep(self.timing.first_line_poll);
        }

        Ok(None)
    }

    /// Steady-state collection after the first line.
    fn sample(
        &mut self,
        link: &mut dyn SerialLink,
        observer: &dyn RunObserver,
    ) -> std::io::Result<FinishReason> {
        let wanted = self.target_count.saturating_add(1);
        let period = Duration::from_secs_f64(self.config.sampling_period_ms / 1000.0);
        let mut last_sample = Instant::now();

        while (self.lines.len() as u64) < wanted && self.signal.is_active() {
            let now = Instant::now();
            if now.duration_since(last_sample) >= period && link.bytes_waiting()? > 0 {
                let line = decode_line(&link.read_line()?);
                if !line.is_empty() {
                    self.lines.push(line);
                    // Measured from before the read so read latency does not stretch the period
                    last_sample = now;

                    let current = (self.lines.len() as u64).min(self.target_count);
                    let line = &self.lines[self.lines.len() - 1];
                    observer.on_line_received(line, current, self.target_count);
                }
            }
            std::thread::sleep(self.timing.idle_sleep);
        }

        if self.lines.len() as u64 >= wanted {
            Ok(FinishReason::Completed)
        } else {
            Ok(FinishReason::StoppedEarly)
        }
    }
}
