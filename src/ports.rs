//! Serial port enumeration.
//!
//! Lists the ports the operating system reports and picks the one most
//! likely to be a USB-attached Arduino.

use serde::Serialize;
use serialport::SerialPortType;

/// Label fragments that suggest a USB serial adapter.
const PREFERRED_MARKERS: &[&str] = &["usb", "serial", "ch340"];

/// A serial port available on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Platform device name, e.g. `/dev/ttyACM0` or `COM3`
    pub device: String,

    /// Human-readable description
    pub description: String,
}

impl PortInfo {
    pub fn new(device: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            description: description.into(),
        }
    }

    /// Display label combining device and description, e.g. `COM3 - USB-SERIAL CH340`.
    pub fn label(&self) -> String {
        format!("{} - {}", self.device, self.description)
    }
}

impl std::fmt::Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.device, self.description)
    }
}

/// Enumerate the serial ports the OS currently reports.
///
/// # Errors
///
/// Returns the `serialport` error if the platform enumeration fails.
pub fn list_ports() -> Result<Vec<PortInfo>, serialport::Error> {
    let ports = serialport::available_ports()?;

    Ok(ports
        .into_iter()
        .map(|port| PortInfo::new(port.port_name, describe(&port.port_type)))
        .collect())
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => usb
            .product
            .clone()
            .or_else(|| usb.manufacturer.clone())
            .unwrap_or_else(|| "USB Serial Device".to_string()),
        SerialPortType::PciPort => "PCI Device".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth Device".to_string(),
        SerialPortType::Unknown => "n/a".to_string(),
    }
}

/// Pick the port to use when none was configured.
///
/// Prefers the first port whose label mentions USB, serial or CH340, then
/// falls back to the first port listed.
pub fn preferred_port(ports: &[PortInfo]) -> Option<&PortInfo> {
    ports
        .iter()
        .find(|port| {
            let label = port.label().to_lowercase();
            PREFERRED_MARKERS.iter().any(|marker| label.contains(marker))
        })
        .or_else(|| ports.first())
}
