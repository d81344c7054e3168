//! In-memory simulated serial devices.
//!
//! [`SimBackend`] plays the role of the host: it lists ports, opens them and
//! can be told to fail. Each open returns a handle onto a [`SimDevice`], which
//! the test (or demo) drives from the other side: push inbound chunks, inspect
//! what was written, inject read/write faults, or make the handle report itself
//! closed to mimic a silent disconnect.
//!
//! Inbound data is delivered one pushed chunk per read, so chunk boundaries
//! survive the trip through the reader task.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{PortBackend, PortHandle, PortInfo, PortKind};
use crate::params::ConnectionParams;

#[derive(Default)]
struct DeviceState {
    open: bool,
    inbound: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    write_calls: usize,
    flushes: usize,
    read_faults: VecDeque<io::Error>,
    write_fault: Option<io::ErrorKind>,
    /// Max bytes accepted per write call.
    write_limit: Option<usize>,
    /// Writes after this many accepted bytes return 0.
    stall_after: Option<usize>,
}

/// Device side of a simulated port.
#[derive(Clone, Default)]
pub struct SimDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue one chunk for the host to read.
    pub fn push_inbound(&self, chunk: &[u8]) {
        if !chunk.is_empty() {
            self.lock().inbound.push_back(chunk.to_vec());
        }
    }

    /// Everything the host has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    pub fn write_calls(&self) -> usize {
        self.lock().write_calls
    }

    pub fn flushes(&self) -> usize {
        self.lock().flushes
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Make the host handle report closed without any I/O error.
    pub fn drop_silently(&self) {
        self.lock().open = false;
    }

    /// The next reads fail with these errors, in order.
    pub fn fail_reads<I>(&self, errors: I)
    where
        I: IntoIterator<Item = io::Error>,
    {
        self.lock().read_faults.extend(errors);
    }

    /// Every write fails with `kind` until cleared with `None`.
    pub fn fail_writes(&self, kind: Option<io::ErrorKind>) {
        self.lock().write_fault = kind;
    }

    /// Accept at most `limit` bytes per write call.
    pub fn limit_writes(&self, limit: Option<usize>) {
        self.lock().write_limit = limit;
    }

    /// Accept `accepted` more bytes, then report 0-byte writes.
    pub fn stall_writes_after(&self, accepted: Option<usize>) {
        let mut state = self.lock();
        state.stall_after = accepted.map(|n| state.written.len() + n);
    }
}

/// Host side of a simulated port.
pub struct SimPort {
    name: String,
    device: SimDevice,
    closed: bool,
}

impl PortHandle for SimPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.device.is_open()
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        let mut state = self.device.lock();
        if let Some(err) = state.read_faults.pop_front() {
            return Err(err);
        }
        Ok(state.inbound.front().map_or(0, Vec::len))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.device.lock();
        if let Some(err) = state.read_faults.pop_front() {
            return Err(err);
        }
        let Some(mut chunk) = state.inbound.pop_front() else {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            state.inbound.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.device.lock();
        if !state.open {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "port closed"));
        }
        if let Some(kind) = state.write_fault {
            return Err(io::Error::new(kind, "simulated write failure"));
        }
        state.write_calls += 1;
        let mut n = state.write_limit.map_or(buf.len(), |limit| buf.len().min(limit));
        if let Some(stall_at) = state.stall_after {
            n = n.min(stall_at.saturating_sub(state.written.len()));
        }
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.device.lock().flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            self.device.lock().open = false;
        }
        Ok(())
    }
}

// Like an OS handle, dropping the port releases the device.
impl Drop for SimPort {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[derive(Default)]
struct BackendState {
    devices: HashMap<String, SimDevice>,
    listed: Vec<String>,
    open_failures: usize,
    enumerate_failures: usize,
}

/// Simulated host with a set of attached devices.
#[derive(Clone, Default)]
pub struct SimBackend {
    state: Arc<Mutex<BackendState>>,
    open_attempts: Arc<AtomicUsize>,
    enumerations: Arc<AtomicUsize>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a device under `name` and return its device side.
    pub fn attach(&self, name: &str) -> SimDevice {
        let device = SimDevice::new();
        let mut state = self.lock();
        state.devices.insert(name.to_string(), device.clone());
        if !state.listed.iter().any(|n| n == name) {
            state.listed.push(name.to_string());
        }
        device
    }

    /// Remove `name` from enumeration. An already-open handle keeps reporting open.
    pub fn unplug(&self, name: &str) {
        let mut state = self.lock();
        state.listed.retain(|n| n != name);
        state.devices.remove(name);
    }

    /// Device side of `name`, if attached.
    pub fn device(&self, name: &str) -> Option<SimDevice> {
        self.lock().devices.get(name).cloned()
    }

    /// Make the next `count` opens fail.
    pub fn fail_opens(&self, count: usize) {
        self.lock().open_failures = count;
    }

    /// Make the next `count` enumerations fail.
    pub fn fail_enumerations(&self, count: usize) {
        self.lock().enumerate_failures = count;
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }
}

impl PortBackend for SimBackend {
    fn available_ports(&self) -> io::Result<Vec<PortInfo>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if state.enumerate_failures > 0 {
            state.enumerate_failures -= 1;
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "simulated enumeration failure",
            ));
        }
        let mut ports: Vec<PortInfo> = state
            .listed
            .iter()
            .map(|name| PortInfo {
                kind: PortKind::Usb,
                product: Some("Simulated device".to_string()),
                ..PortInfo::named(name.clone())
            })
            .collect();
        super::sort_ports(&mut ports);
        Ok(ports)
    }

    fn open(&self, params: &ConnectionParams) -> io::Result<Box<dyn PortHandle>> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "simulated open failure",
            ));
        }
        let device = state.devices.get(&params.port).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such port: {}", params.port),
            )
        })?;
        drop(state);

        {
            let mut dev = device.lock();
            if dev.open {
                return Err(io::Error::new(io::ErrorKind::AddrInUse, "port busy"));
            }
            dev.open = true;
            dev.inbound.clear();
        }
        Ok(Box::new(SimPort {
            name: params.port.clone(),
            device,
            closed: false,
        }))
    }
}
