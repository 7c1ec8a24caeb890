//! Serial link module: the byte-level connection the collector reads from.
//!
//! The collector only needs two things from a connection: how many bytes are
//! waiting, and "read one newline-terminated chunk or give up at the timeout".
//! `SerialLink` captures exactly that, and `Connector` opens links so the
//! sampling loop can run against real hardware or a simulated device.

use std::io::{self, BufRead, BufReader};
use std::time::Duration;

use serialport::SerialPort;
use tracing::debug;

/// An open, exclusively-owned serial connection.
///
/// Dropping the link closes the underlying connection.
pub trait SerialLink: Send {
    /// Number of bytes that can be read without waiting.
    fn bytes_waiting(&mut self) -> io::Result<usize>;

    /// Read up to and including the next `\n`.
    ///
    /// Returns whatever arrived (possibly nothing) if the read timeout
    /// elapses first.
    fn read_line(&mut self) -> io::Result<Vec<u8>>;
}

/// Opens serial links by device name and baud rate.
pub trait Connector: Send + Sync {
    /// Open `device` at `baud_rate`, with reads bounded by `read_timeout`.
    fn open(
        &self,
        device: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> io::Result<Box<dyn SerialLink>>;
}

/// Decode one raw read into a trimmed text line.
///
/// Invalid UTF-8 is replaced rather than rejected, so decoding never fails.
pub fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}

/// `SerialLink` backed by a port opened through the `serialport` crate.
pub struct PortLink {
    reader: BufReader<Box<dyn SerialPort>>,
}

impl PortLink {
    /// Wrap an already-open port.
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            reader: BufReader::new(port),
        }
    }
}

impl SerialLink for PortLink {
    fn bytes_waiting(&mut self) -> io::Result<usize> {
        // Bytes already pulled into the read buffer count as waiting too
        let buffered = self.reader.buffer().len();
        let pending = self.reader.get_ref().bytes_to_read()?;
        Ok(buffered + pending as usize)
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(_) => Ok(line),
            // A timeout leaves the partial chunk in `line`
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(line),
            Err(e) => Err(e),
        }
    }
}

/// Connector for real serial hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortConnector;

impl PortConnector {
    /// Create a new hardware connector.
    pub fn new() -> Self {
        Self
    }
}

impl Connector for PortConnector {
    fn open(
        &self,
        device: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> io::Result<Box<dyn SerialLink>> {
        let port = serialport::new(device, baud_rate)
            .timeout(read_timeout)
            .open()?;

        debug!(device = %device, baud_rate = baud_rate, "Serial port opened");

        Ok(Box::new(PortLink::new(port)))
    }
}
