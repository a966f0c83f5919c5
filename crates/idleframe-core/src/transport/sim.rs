//! Simulated serial port
//!
//! An in-memory port for exercising a link without hardware. The test or demo
//! keeps a [`SimulatedPort`] handle and injects bytes as if they arrived on the
//! wire; whatever the link writes can be read back with
//! [`SimulatedPort::written`].

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Connector, Transport};
use crate::config::PortSettings;
use crate::error::LinkError;

#[derive(Debug, Default)]
struct SimState {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    /// Upcoming reads that return one byte less than they could
    short_reads: usize,
    /// All I/O fails with this kind (unplugged adapter)
    failure: Option<ErrorKind>,
    connected: bool,
    connects: usize,
}

/// Handle to a simulated port, shared with the link's transport
#[derive(Debug, Clone, Default)]
pub struct SimulatedPort {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPort {
    /// Create an idle, disconnected port
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `bytes` available to read in one burst
    pub fn inject(&self, bytes: &[u8]) {
        self.state().rx.extend(bytes);
    }

    /// Everything written so far
    pub fn written(&self) -> Vec<u8> {
        self.state().tx.clone()
    }

    /// Bytes injected but not yet read
    pub fn pending(&self) -> usize {
        self.state().rx.len()
    }

    /// Make the next non-empty read come back one byte short
    pub fn short_read_next(&self) {
        self.state().short_reads += 1;
    }

    /// Fail all further I/O, as if the adapter was unplugged
    pub fn fail_with(&self, kind: ErrorKind) {
        self.state().failure = Some(kind);
    }

    /// Whether a transport is currently open on this port
    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// How many times the port has been opened
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }
}

/// The link's end of a [`SimulatedPort`]
struct SimulatedTransport {
    port: SimulatedPort,
}

impl SimulatedTransport {
    fn check(state: &SimState) -> io::Result<()> {
        match state.failure {
            Some(kind) => Err(io::Error::new(kind, "simulated port failure")),
            None => Ok(()),
        }
    }
}

impl Read for SimulatedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.port.state();
        Self::check(&state)?;
        let mut n = buf.len().min(state.rx.len());
        if n > 0 && state.short_reads > 0 {
            state.short_reads -= 1;
            n -= 1;
        }
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.port.state();
        Self::check(&state)?;
        state.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Self::check(&self.port.state())
    }
}

impl Transport for SimulatedTransport {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        let state = self.port.state();
        Self::check(&state)?;
        Ok(state.rx.len())
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        self.port.state().connected = false;
    }
}

/// Opens a [`SimulatedPort`], or refuses to
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    port: SimulatedPort,
    refusal: Option<String>,
}

impl SimulatedConnector {
    /// Connector that opens `port`
    pub fn new(port: SimulatedPort) -> Self {
        Self {
            port,
            refusal: None,
        }
    }

    /// Connector whose every open fails with `reason`
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            port: SimulatedPort::new(),
            refusal: Some(reason.into()),
        }
    }
}

impl Connector for SimulatedConnector {
    fn connect(&self, settings: &PortSettings) -> Result<Box<dyn Transport>, LinkError> {
        if let Some(reason) = &self.refusal {
            return Err(LinkError::OpenFailed(format!(
                "{}: {}",
                settings.port_name, reason
            )));
        }
        let mut state = self.port.state();
        if state.connected {
            return Err(LinkError::OpenFailed(format!(
                "{}: port busy",
                settings.port_name
            )));
        }
        state.connected = true;
        state.connects += 1;
        state.rx.clear();
        drop(state);

        Ok(Box::new(SimulatedTransport {
            port: self.port.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_and_read() {
        let port = SimulatedPort::new();
        let mut transport = SimulatedConnector::new(port.clone())
            .connect(&PortSettings::default())
            .unwrap();
        port.inject(b"hello");
        assert_eq!(transport.bytes_to_read().unwrap(), 5);

        let mut buf = [0u8; 3];
        assert_eq!(transport.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(port.pending(), 2);
    }

    #[test]
    fn test_short_read_applies_once() {
        let port = SimulatedPort::new();
        let mut transport = SimulatedConnector::new(port.clone())
            .connect(&PortSettings::default())
            .unwrap();
        port.inject(b"abc");
        port.short_read_next();

        let mut buf = [0u8; 3];
        assert_eq!(transport.read(&mut buf).unwrap(), 2);
        assert_eq!(transport.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'c');
    }

    #[test]
    fn test_write_and_disconnect_on_drop() {
        let port = SimulatedPort::new();
        let mut transport = SimulatedConnector::new(port.clone())
            .connect(&PortSettings::default())
            .unwrap();
        assert!(port.is_connected());
        transport.write_all(b"AT\n").unwrap();
        assert_eq!(port.written(), b"AT\n".to_vec());

        drop(transport);
        assert!(!port.is_connected());
    }

    #[test]
    fn test_second_connect_while_open_is_refused() {
        let port = SimulatedPort::new();
        let connector = SimulatedConnector::new(port.clone());
        let _first = connector.connect(&PortSettings::default()).unwrap();
        assert!(connector.connect(&PortSettings::default()).is_err());
        assert_eq!(port.connect_count(), 1);
    }

    #[test]
    fn test_failure_surfaces_as_io_error() {
        let port = SimulatedPort::new();
        let mut transport = SimulatedConnector::new(port.clone())
            .connect(&PortSettings::default())
            .unwrap();
        port.fail_with(ErrorKind::BrokenPipe);
        assert_eq!(
            transport.bytes_to_read().unwrap_err().kind(),
            ErrorKind::BrokenPipe
        );
    }
}
