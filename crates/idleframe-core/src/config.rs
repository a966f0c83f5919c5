//! Link configuration
//!
//! Line parameters for the serial port plus the framing settings. Everything
//! here is plain data that can be stored as JSON next to an application's
//! other settings.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::LinkError;

/// Default baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default inter-byte inactivity timeout in milliseconds
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 128;

/// Default frame buffer capacity in bytes
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Largest frame buffer a configuration may ask for (16 MiB)
pub const MAX_BUFFER_CAPACITY: usize = 16 * 1024 * 1024;

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum DataBits {
    #[serde(rename = "5")]
    Five,
    #[serde(rename = "6")]
    Six,
    #[serde(rename = "7")]
    Seven,
    #[default]
    #[serde(rename = "8")]
    Eight,
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    /// One stop bit
    #[default]
    One,
    /// Two stop bits
    Two,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Physical port settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3"); also the frame source identity
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Parity
    pub parity: Parity,
    /// Data bits
    pub data_bits: DataBits,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Assert DTR after opening
    pub dtr: bool,
    /// Assert RTS after opening
    pub rts: bool,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            dtr: true,
            rts: true,
        }
    }
}

/// Full link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Physical port settings
    pub port: PortSettings,
    /// Inter-byte gap after which the accumulation is emitted as a frame
    pub receive_timeout_ms: u64,
    /// Use timeout framing; when false every arrival is its own frame
    pub timeout_enabled: bool,
    /// Largest frame that can be accumulated
    pub buffer_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: PortSettings::default(),
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
            timeout_enabled: true,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl LinkConfig {
    /// Default configuration for the named port
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port: PortSettings {
                port_name: port_name.into(),
                ..PortSettings::default()
            },
            ..Self::default()
        }
    }

    /// Receive timeout as a [`Duration`]
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Check the framing parameters
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.buffer_capacity == 0 {
            return Err(LinkError::InvalidConfig(
                "buffer_capacity must be at least 1 byte".to_string(),
            ));
        }
        if self.buffer_capacity > MAX_BUFFER_CAPACITY {
            return Err(LinkError::InvalidConfig(format!(
                "buffer_capacity {} exceeds the {} byte limit",
                self.buffer_capacity, MAX_BUFFER_CAPACITY
            )));
        }
        if self.timeout_enabled && self.receive_timeout_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "receive_timeout_ms must be non-zero when timeout framing is enabled".to_string(),
            ));
        }
        if self.port.baud_rate == 0 {
            return Err(LinkError::InvalidConfig("baud_rate must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, LinkError> {
        let config: LinkConfig = serde_json::from_str(json)
            .map_err(|e| LinkError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn load(path: &Path) -> Result<Self, LinkError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            LinkError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String, LinkError> {
        serde_json::to_string_pretty(self).map_err(|e| LinkError::InvalidConfig(e.to_string()))
    }
}
