//! Connection parameter model and validation.
//!
//! Every field of [`ConnectionParams`] must belong to its enumerated valid set
//! before a port is opened. [`ConnectionParams::validate`] is called by the
//! connection manager ahead of any OS call, so a bad value fails fast without
//! touching the device.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ParamError;

/// Baud rates accepted by [`ConnectionParams::validate`].
pub const VALID_BAUD_RATES: [u32; 8] = [
    9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600,
];

/// Data bits per character accepted by [`ConnectionParams::validate`].
pub const VALID_BYTE_SIZES: [u8; 4] = [5, 6, 7, 8];

/// Upper bound for either timeout. A write must never block indefinitely.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60);

/// Parity setting, written in configs and on the CLI as its one-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    #[serde(rename = "N")]
    None,
    #[serde(rename = "E")]
    Even,
    #[serde(rename = "O")]
    Odd,
    #[serde(rename = "M")]
    Mark,
    #[serde(rename = "S")]
    Space,
}

impl Parity {
    /// Parse a one-letter parity code (`N`, `E`, `O`, `M`, `S`), case-insensitive.
    pub fn from_code(code: &str) -> Result<Self, ParamError> {
        match code.trim().to_ascii_uppercase().as_str() {
            "N" => Ok(Parity::None),
            "E" => Ok(Parity::Even),
            "O" => Ok(Parity::Odd),
            "M" => Ok(Parity::Mark),
            "S" => Ok(Parity::Space),
            _ => Err(ParamError::InvalidParity(code.to_string())),
        }
    }

    pub fn code(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

impl StopBits {
    pub fn from_value(value: f32) -> Result<Self, ParamError> {
        if value == 1.0 {
            Ok(StopBits::One)
        } else if value == 1.5 {
            Ok(StopBits::OnePointFive)
        } else if value == 2.0 {
            Ok(StopBits::Two)
        } else {
            Err(ParamError::InvalidStopBits(value))
        }
    }

    pub fn value(self) -> f32 {
        match self {
            StopBits::One => 1.0,
            StopBits::OnePointFive => 1.5,
            StopBits::Two => 2.0,
        }
    }
}

impl TryFrom<f32> for StopBits {
    type Error = ParamError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        StopBits::from_value(value)
    }
}

impl From<StopBits> for f32 {
    fn from(bits: StopBits) -> Self {
        bits.value()
    }
}

/// Flow-control flags. Each one is independent; any combination is accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowControl {
    pub xon_xoff: bool,
    pub rts_cts: bool,
    pub dsr_dtr: bool,
}

/// Everything needed to open a port.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    /// Port identifier, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    pub baud_rate: u32,
    /// Data bits per character (5-8).
    pub byte_size: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub flow_control: FlowControl,
}

impl ConnectionParams {
    /// 8N1 parameters for `port` at `baud_rate`, with a 100ms read timeout and
    /// a 1s write timeout.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            byte_size: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_secs(1),
            flow_control: FlowControl::default(),
        }
    }

    /// Check every field against its valid set.
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.port.trim().is_empty() {
            return Err(ParamError::EmptyPort);
        }
        if !VALID_BAUD_RATES.contains(&self.baud_rate) {
            return Err(ParamError::InvalidBaudRate(self.baud_rate));
        }
        if !VALID_BYTE_SIZES.contains(&self.byte_size) {
            return Err(ParamError::InvalidByteSize(self.byte_size));
        }
        check_timeout("read", self.read_timeout)?;
        check_timeout("write", self.write_timeout)?;
        Ok(())
    }
}

fn check_timeout(which: &'static str, value: Duration) -> Result<(), ParamError> {
    if value.is_zero() || value > MAX_TIMEOUT {
        return Err(ParamError::InvalidTimeout { which, value });
    }
    Ok(())
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} {}{}{}",
            self.port,
            self.baud_rate,
            self.byte_size,
            self.parity.code(),
            self.stop_bits.value()
        )
    }
}
