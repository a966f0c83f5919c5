//! Serial port transport
//!
//! Opens and configures ports through the `serialport` crate and enumerates
//! the ports present on the machine.

use serialport::{ClearBuffer, FlowControl, SerialPort, SerialPortInfo, SerialPortType};
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::{Connector, Transport};
use crate::config::PortSettings;
use crate::error::LinkError;

/// Read timeout handed to the driver. Reads only ask for bytes already
/// reported available, so this only bounds a misbehaving driver.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// USB identity of a port, as reported by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbIdentity {
    /// Vendor ID
    pub vid: u16,
    /// Product ID
    pub pid: u16,
    /// Serial number; tells two identical adapters apart
    pub serial_number: Option<String>,
    /// Manufacturer string
    pub manufacturer: Option<String>,
    /// Product string
    pub product: Option<String>,
}

/// How a port is attached to the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortKind {
    /// USB serial adapter or CDC device
    Usb(UsbIdentity),
    /// Bluetooth serial profile
    Bluetooth,
    /// Built-in or PCI card UART
    Pci,
    /// Not reported by the driver, or found only as a device node
    Unknown,
}

/// A serial port present on the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Name to put in [`PortSettings::port_name`]
    pub name: String,
    /// How the port is attached
    pub kind: PortKind,
}

impl PortInfo {
    /// USB identity, if the port is a USB device
    pub fn usb(&self) -> Option<&UsbIdentity> {
        match &self.kind {
            PortKind::Usb(usb) => Some(usb),
            _ => None,
        }
    }

    /// One-line description, e.g. `/dev/ttyACM0 [2341:0043] Arduino Uno (SN 7543)`
    pub fn label(&self) -> String {
        let Some(usb) = self.usb() else {
            return match self.kind {
                PortKind::Bluetooth => format!("{} (bluetooth)", self.name),
                PortKind::Pci => format!("{} (pci)", self.name),
                _ => self.name.clone(),
            };
        };
        let mut label = format!("{} [{:04x}:{:04x}]", self.name, usb.vid, usb.pid);
        if let Some(product) = usb.product.as_ref().or(usb.manufacturer.as_ref()) {
            label.push(' ');
            label.push_str(product);
        }
        if let Some(serial) = &usb.serial_number {
            label.push_str(&format!(" (SN {serial})"));
        }
        label
    }

    /// Listing order: CDC-ACM devices, USB adapters, COM ports, everything
    /// else. Within a family names sort by stem, then by trailing number, so
    /// `COM2` comes before `COM10`.
    fn order(&self) -> (u8, &str, u64) {
        let base = self.name.rsplit('/').next().unwrap_or(&self.name);
        let stem = base.trim_end_matches(|c: char| c.is_ascii_digit());
        let index = base[stem.len()..].parse().unwrap_or(u64::MAX);
        let family = match stem {
            "ttyACM" => 0,
            "ttyUSB" => 1,
            "COM" => 2,
            _ => 3,
        };
        (family, stem, index)
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let kind = match info.port_type {
            SerialPortType::UsbPort(usb) => PortKind::Usb(UsbIdentity {
                vid: usb.vid,
                pid: usb.pid,
                serial_number: usb.serial_number,
                manufacturer: usb.manufacturer,
                product: usb.product,
            }),
            SerialPortType::BluetoothPort => PortKind::Bluetooth,
            SerialPortType::PciPort => PortKind::Pci,
            SerialPortType::Unknown => PortKind::Unknown,
        };
        Self {
            name: info.port_name,
            kind,
        }
    }
}

fn sort_ports(ports: &mut Vec<PortInfo>) {
    ports.sort_by(|a, b| a.order().cmp(&b.order()));
    ports.dedup_by(|a, b| a.name == b.name);
}

/// Device nodes the enumeration API can miss (USB CDC devices on Linux)
#[cfg(target_os = "linux")]
fn device_nodes() -> Vec<PortInfo> {
    let Ok(entries) = fs::read_dir("/dev") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("ttyACM") || name.starts_with("ttyUSB"))
        .map(|name| PortInfo {
            name: format!("/dev/{name}"),
            kind: PortKind::Unknown,
        })
        .collect()
}

#[cfg(not(target_os = "linux"))]
fn device_nodes() -> Vec<PortInfo> {
    Vec::new()
}

/// Serial ports present on the machine, USB devices first.
///
/// Ports the driver reports come before bare device nodes, so when both
/// name the same port the entry with USB details is kept.
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = match serialport::available_ports() {
        Ok(found) => found.into_iter().map(PortInfo::from).collect(),
        Err(e) => {
            tracing::warn!("port enumeration failed: {e}");
            Vec::new()
        }
    };
    ports.extend(device_nodes());
    sort_ports(&mut ports);
    ports
}

/// [`Transport`] over an open serial port
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Wrap an already opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(io::Error::other)
    }
}

/// Opens real serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn connect(&self, settings: &PortSettings) -> Result<Box<dyn Transport>, LinkError> {
        let mut port = serialport::new(&settings.port_name, settings.baud_rate)
            .data_bits(settings.data_bits.into())
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits.into())
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()?;

        // Line control failures are not fatal; some adapters lack the pins
        if let Err(e) = port.write_data_terminal_ready(settings.dtr) {
            tracing::warn!(port = %settings.port_name, "failed to set DTR: {e}");
        }
        if let Err(e) = port.write_request_to_send(settings.rts) {
            tracing::warn!(port = %settings.port_name, "failed to set RTS: {e}");
        }

        // Start from an empty line rather than whatever queued up before open
        port.clear(ClearBuffer::All)?;

        Ok(Box::new(SerialTransport::new(port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration does not panic
        for port in list_ports() {
            println!("Found port: {}", port.label());
        }
    }

    fn node(name: &str) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            kind: PortKind::Unknown,
        }
    }

    fn usb_port(name: &str) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            kind: PortKind::Usb(UsbIdentity {
                vid: 0x2341,
                pid: 0x0043,
                serial_number: Some("7543".to_string()),
                manufacturer: Some("Arduino".to_string()),
                product: Some("Uno".to_string()),
            }),
        }
    }

    #[test]
    fn test_port_sorting() {
        let mut ports: Vec<PortInfo> = [
            "/dev/ttyUSB1",
            "COM10",
            "/dev/ttyS10",
            "/dev/ttyACM1",
            "/dev/ttyUSB0",
            "COM2",
            "/dev/ttyS2",
            "/dev/ttyACM0",
            "/dev/someport",
            "/dev/ttyACM10",
        ]
        .into_iter()
        .map(node)
        .collect();

        sort_ports(&mut ports);
        let ordered: Vec<&str> = ports.iter().map(|p| p.name.as_str()).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "COM2",
                "COM10",
                "/dev/someport",
                "/dev/ttyS2",
                "/dev/ttyS10",
            ]
        );
    }

    #[test]
    fn test_reported_port_wins_over_device_node() {
        let mut ports = vec![usb_port("/dev/ttyACM0"), node("/dev/ttyUSB0"), node("/dev/ttyACM0")];
        sort_ports(&mut ports);

        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].usb().map(|usb| usb.vid), Some(0x2341));
        assert_eq!(ports[1].usb(), None);
    }

    #[test]
    fn test_label() {
        assert_eq!(
            usb_port("/dev/ttyACM0").label(),
            "/dev/ttyACM0 [2341:0043] Uno (SN 7543)"
        );
        assert_eq!(node("/dev/ttyS0").label(), "/dev/ttyS0");
        let bt = PortInfo {
            name: "/dev/rfcomm0".to_string(),
            kind: PortKind::Bluetooth,
        };
        assert_eq!(bt.label(), "/dev/rfcomm0 (bluetooth)");
    }

    #[test]
    fn test_connect_missing_port_fails() {
        let settings = PortSettings {
            port_name: "/dev/idleframe-does-not-exist".to_string(),
            ..PortSettings::default()
        };
        let err = SerialConnector.connect(&settings).err().unwrap();
        assert!(!err.is_frame_fault());
    }
}
