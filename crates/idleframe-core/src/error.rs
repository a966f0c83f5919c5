//! Link errors

use thiserror::Error;

/// Errors that can occur while assembling frames or driving the link
#[derive(Error, Debug)]
pub enum LinkError {
    /// The accumulated frame would exceed the buffer capacity.
    /// The accumulation is discarded, never partially delivered.
    #[error("Frame buffer overflow: {attempted} bytes exceed capacity of {capacity}")]
    Overflow { capacity: usize, attempted: usize },

    /// The transport returned fewer bytes than it reported available.
    /// The accumulation is discarded.
    #[error("Short read: {reported} bytes reported available, {read} read")]
    ShortRead { reported: usize, read: usize },

    #[error("Failed to open port: {0}")]
    OpenFailed(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Link is already open")]
    AlreadyOpen,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether this error only costs the frame currently being assembled.
    /// Such faults leave the link running.
    pub fn is_frame_fault(&self) -> bool {
        matches!(self, LinkError::Overflow { .. } | LinkError::ShortRead { .. })
    }
}

impl From<serialport::Error> for LinkError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => LinkError::PortNotFound(err.description),
            serialport::ErrorKind::Io(kind) => {
                LinkError::Io(std::io::Error::new(kind, err.description))
            }
            _ => LinkError::OpenFailed(err.description),
        }
    }
}
