//! Byte transports
//!
//! The framing core only needs a way to ask how many bytes are waiting, read
//! them, and write. [`serial`] provides that over a real serial port and
//! [`sim`] over an in-memory port for tests and demos.

pub mod serial;
pub mod sim;

pub use serial::{list_ports, PortInfo, PortKind, SerialConnector, SerialTransport, UsbIdentity};
pub use sim::{SimulatedConnector, SimulatedPort};

use std::fmt::Write as _;
use std::io::{self, Read, Write};

use crate::config::PortSettings;
use crate::error::LinkError;

/// An open, raw byte channel
pub trait Transport: Read + Write + Send {
    /// Number of bytes that can be read without blocking
    fn bytes_to_read(&mut self) -> io::Result<usize>;
}

/// Opens transports for a set of port settings
pub trait Connector: Send + Sync {
    /// Open and configure the port described by `settings`
    fn connect(&self, settings: &PortSettings) -> Result<Box<dyn Transport>, LinkError>;
}

/// Format bytes as space-separated uppercase hex, e.g. `"41 42 "`
pub fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        let _ = write!(out, "{:02X} ", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(b"AB\x00\xff"), "41 42 00 FF ");
        assert_eq!(hex_string(&[]), "");
    }
}
