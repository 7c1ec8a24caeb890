//! Live view of a collection run for the terminal.
//!
//! `Scrollback` holds the most recent lines with a fixed capacity, and
//! `LiveView` renders collector events to any `Write` sink. In quiet mode the
//! view prints coarse progress instead of every line, then the scrollback
//! tail when the run ends.

use std::collections::VecDeque;
use std::io::{self, Write};

use tracing::debug;

use crate::collector::{CollectorEvent, FinishReason};

/// Default number of lines kept for display.
pub const DEFAULT_SCROLLBACK_LINES: usize = 1_000;

/// Bounded buffer of the most recently received lines.
///
/// Pushing past capacity evicts the oldest line.
#[derive(Debug, Clone)]
pub struct Scrollback {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Scrollback {
    /// Create a scrollback holding at most `capacity` lines (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(DEFAULT_SCROLLBACK_LINES)),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    /// The last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &str> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Default for Scrollback {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLLBACK_LINES)
    }
}

/// Progress shown as `current/target`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub current: u64,
    pub target: u64,
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.current, self.target)
    }
}

/// Final status text for a finished run.
///
/// `received` is the total number of lines collected, header included.
pub fn summary_text(reason: &FinishReason, target: u64, received: u64) -> String {
    match reason {
        FinishReason::Completed => {
            format!("Collection complete - saved {} samples + header", target)
        }
        FinishReason::StoppedEarly => format!(
            "Collection stopped - saved {} samples + header",
            received.saturating_sub(1)
        ),
        FinishReason::ConnectionFailed(e) => format!("Error: Could not open serial port: {}", e),
        FinishReason::NoDataTimeout => {
            "Error: No incoming data from device, check port or Arduino code".to_string()
        }
        FinishReason::RuntimeError(e) => format!("Error: {}", e),
    }
}

/// Renders collector events as plain text lines.
pub struct LiveView<W: Write> {
    out: W,
    /// Lines kept for the end-of-run recap; `None` echoes every line instead
    recap: Option<(Scrollback, usize)>,
    progress: Progress,
    received: u64,
    last_decile: u64,
}

impl<W: Write> LiveView<W> {
    /// A view that echoes every received line with its progress.
    pub fn new(out: W) -> Self {
        Self {
            out,
            recap: None,
            progress: Progress::default(),
            received: 0,
            last_decile: 0,
        }
    }

    /// A view that reports progress every 10% and prints the last
    /// `tail_lines` lines when the run ends.
    pub fn quiet(out: W, tail_lines: usize) -> Self {
        let capacity = tail_lines.min(DEFAULT_SCROLLBACK_LINES);
        Self {
            recap: Some((Scrollback::new(capacity), tail_lines)),
            ..Self::new(out)
        }
    }

    /// Reset for a new run of `target` samples.
    pub fn start(&mut self, target: u64) {
        if let Some((scrollback, _)) = &mut self.recap {
            scrollback.clear();
        }
        self.progress = Progress { current: 0, target };
        self.received = 0;
        self.last_decile = 0;
    }

    /// Render one event.
    pub fn handle(&mut self, event: &CollectorEvent) -> io::Result<()> {
        match event {
            CollectorEvent::Status(text) => {
                writeln!(self.out, "[status] {}", text)?;
            }
            CollectorEvent::LineReceived {
                line,
                current,
                target,
            } => {
                self.received += 1;
                self.progress = Progress {
                    current: *current,
                    target: *target,
                };
                match &mut self.recap {
                    None => writeln!(self.out, "[{}] {}", self.progress, line)?,
                    Some((scrollback, _)) => {
                        scrollback.push(line.as_str());
                        let decile = current.saturating_mul(10) / (*target).max(1);
                        if decile > self.last_decile {
                            self.last_decile = decile;
                            writeln!(self.out, "[progress] {}", self.progress)?;
                        }
                    }
                }
            }
            CollectorEvent::Finished { reason, target } => {
                debug!(reason = %reason, "Run finished");
                if let Some((scrollback, tail_lines)) = &self.recap {
                    if !scrollback.is_empty() {
                        writeln!(self.out, "[recent]")?;
                        for line in scrollback.tail(*tail_lines) {
                            writeln!(self.out, "  {}", line)?;
                        }
                    }
                }
                let status = summary_text(reason, *target, self.received);
                writeln!(self.out, "[status] {}", status)?;
            }
        }
        self.out.flush()
    }

    /// Write a status line that does not come from the collector.
    pub fn note(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "[status] {}", text)?;
        self.out.flush()
    }
}
