use std::io;
use std::time::Duration;

use thiserror::Error;

/// Connection parameter validation failures. Raised before any OS resource is touched.
#[derive(Debug, Error)]
pub enum ParamError {
    #[error("port name is empty")]
    EmptyPort,

    #[error("invalid baud rate: {0}")]
    InvalidBaudRate(u32),

    #[error("invalid byte size: {0} (expected 5-8)")]
    InvalidByteSize(u8),

    #[error("invalid parity: {0:?} (expected one of N, E, O, M, S)")]
    InvalidParity(String),

    #[error("invalid stop bits: {0} (expected 1, 1.5 or 2)")]
    InvalidStopBits(f32),

    #[error("invalid {which} timeout: {value:?}")]
    InvalidTimeout { which: &'static str, value: Duration },
}

/// Errors surfaced by the connection manager.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Rejected before the port was touched.
    #[error("invalid connection parameters: {0}")]
    InvalidParams(#[from] ParamError),

    #[error("no active connection")]
    NotConnected,

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The circuit breaker refused the attempt without calling the backend.
    #[error("circuit breaker is open, next attempt allowed in {retry_in:.1?}")]
    CircuitOpen { retry_in: Duration },

    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: io::Error,
    },

    #[error("write failed after {written} bytes: {source}")]
    Write {
        written: usize,
        #[source]
        source: io::Error,
    },

    /// The OS accepted nothing; distinct from an empty payload.
    #[error("device accepted 0 bytes ({written} written, {remaining} remaining)")]
    ZeroWrite { written: usize, remaining: usize },

    #[error("port enumeration failed: {0}")]
    Enumerate(#[source] io::Error),

    #[error("connection manager has been shut down")]
    ShutDown,
}

impl LinkError {
    /// Bytes the OS accepted before a write error, zero for every other variant.
    pub fn bytes_written(&self) -> usize {
        match self {
            LinkError::Write { written, .. } | LinkError::ZeroWrite { written, .. } => *written,
            _ => 0,
        }
    }
}
