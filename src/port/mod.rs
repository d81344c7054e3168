//! # Port Access
//!
//! The connection manager never talks to the OS directly. It goes through two
//! traits so the same lifecycle code drives real hardware and the in-memory
//! simulator:
//!
//! - [`PortBackend`]: enumerates ports and opens them
//! - [`PortHandle`]: one open port (read/write/close primitives)
//!
//! Backends:
//!
//! - [`system::SystemBackend`] (feature `serial`): the host's serial ports via the `serialport` crate
//! - [`sim::SimBackend`]: simulated devices for tests and demos
//!
//! A handle is owned by the manager for the lifetime of one connection. The
//! reader task only borrows it through [`SharedPort`] and never closes it.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, Instant};

use crate::params::ConnectionParams;

pub mod classify;
pub mod sim;
#[cfg(feature = "serial")]
pub mod system;

pub use classify::{DefaultClassifier, ErrorClass, ErrorClassifier};

/// One open serial port.
pub trait PortHandle: Send {
    /// Port identifier this handle was opened with.
    fn name(&self) -> &str;

    /// Whether the handle still considers itself open.
    fn is_open(&self) -> bool;

    /// Bytes waiting in the input buffer.
    fn bytes_to_read(&mut self) -> io::Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write some prefix of `buf`, bounded by the write timeout. Returns the
    /// number of bytes the OS accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()>;

    /// Release the OS resource. Calling it twice is harmless.
    fn close(&mut self) -> io::Result<()>;
}

/// Source of ports: enumeration plus open.
pub trait PortBackend: Send + Sync {
    fn available_ports(&self) -> io::Result<Vec<PortInfo>>;

    fn open(&self, params: &ConnectionParams) -> io::Result<Box<dyn PortHandle>>;
}

/// Port handle shared between the manager and its reader task.
pub type SharedPort = Arc<Mutex<Box<dyn PortHandle>>>;

pub fn share(port: Box<dyn PortHandle>) -> SharedPort {
    Arc::new(Mutex::new(port))
}

/// Lock a shared port, recovering the guard if a previous holder panicked.
pub fn lock_port(port: &SharedPort) -> MutexGuard<'_, Box<dyn PortHandle>> {
    port.lock().unwrap_or_else(|e| e.into_inner())
}

fn try_lock_port(port: &SharedPort) -> Option<MutexGuard<'_, Box<dyn PortHandle>>> {
    match port.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

/// Lock a shared port from async code, giving up after `wait`.
///
/// `None` means someone held the port the whole time, usually a read stuck
/// inside the driver.
pub async fn lock_port_within(
    port: &SharedPort,
    wait: Duration,
) -> Option<MutexGuard<'_, Box<dyn PortHandle>>> {
    let deadline = Instant::now() + wait;
    loop {
        if let Some(guard) = try_lock_port(port) {
            return Some(guard);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(Duration::from_millis(5)).await;
    }
}

/// `is_open` without waiting. `None` while another holder has the port.
pub fn peek_open(port: &SharedPort) -> Option<bool> {
    try_lock_port(port).map(|guard| guard.is_open())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,
    pub kind: PortKind,
    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,
    /// USB product ID (if USB device)
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    /// False when the record describes a port that was looked up but not found.
    pub available: bool,
}

impl PortInfo {
    /// A bare record with nothing but a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
            available: true,
        }
    }

    /// Placeholder returned when a looked-up port is not present.
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            available: false,
            ..Self::named(name)
        }
    }

    /// Short human description, e.g. `USB 1a86:7523 (QinHeng USB Serial)`.
    pub fn description(&self) -> String {
        if !self.available {
            return "port not found".to_string();
        }
        let mut out = match (self.kind, self.vid, self.pid) {
            (PortKind::Usb, Some(vid), Some(pid)) => format!("USB {:04x}:{:04x}", vid, pid),
            (PortKind::Usb, _, _) => "USB".to_string(),
            (PortKind::Pci, _, _) => "PCI".to_string(),
            (PortKind::Bluetooth, _, _) => "Bluetooth".to_string(),
            (PortKind::Unknown, _, _) => "unknown".to_string(),
        };
        let label = match (&self.manufacturer, &self.product) {
            (Some(m), Some(p)) => Some(format!("{} {}", m, p)),
            (Some(m), None) => Some(m.clone()),
            (None, Some(p)) => Some(p.clone()),
            (None, None) => None,
        };
        if let Some(label) = label {
            out.push_str(&format!(" ({})", label));
        }
        out
    }
}

/// Sort key giving deterministic port order:
///  - ttyACM* ports first (sorted numerically by suffix)
///  - then ttyUSB* ports (sorted numerically)
///  - then other ports (sorted by name)
pub(crate) fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

pub(crate) fn sort_ports(ports: &mut [PortInfo]) {
    ports.sort_by_key(|p| port_sort_key(&p.name));
}
