//! # IdleFrame Core Library
//!
//! Protocol-agnostic framing for raw serial links.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! Bytes arriving on the wire are grouped into frames by an inter-byte
//! inactivity timeout instead of any notion of packets the transport may have:
//! - Arrivals are accumulated into a bounded frame buffer
//! - A background watcher emits the accumulation once the line has been idle
//!   for longer than the receive timeout
//! - Each frame is handed to a single subscriber together with the port name
//!
//! A pass-through mode skips the timeout and emits every arrival as its own
//! frame.
//!
//! ## Example
//!
//! ```rust,ignore
//! use idleframe_core::{LinkConfig, SerialLink};
//!
//! let link = SerialLink::new(LinkConfig::for_port("/dev/ttyUSB0"));
//! link.subscribe(|port, frame| println!("{port}: {}", idleframe_core::hex_string(&frame)));
//! link.open()?;
//! link.write_line("AT")?;
//! ```

pub mod clock;
pub mod config;
mod error;
pub mod framing;
mod link;
mod stats;
pub mod transport;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{DataBits, LinkConfig, Parity, PortSettings, StopBits};
pub use error::LinkError;
pub use framing::{FrameBuffer, FrameEmitter, ReceivedFrame};
pub use link::SerialLink;
pub use stats::LinkStats;
pub use transport::{
    hex_string, list_ports, Connector, PortInfo, PortKind, SerialConnector, SimulatedConnector,
    SimulatedPort, Transport, UsbIdentity,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{LinkConfig, PortSettings};
    pub use crate::error::LinkError;
    pub use crate::framing::ReceivedFrame;
    pub use crate::link::SerialLink;
    pub use crate::stats::LinkStats;
    pub use crate::transport::{Connector, SimulatedConnector, SimulatedPort, Transport};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
