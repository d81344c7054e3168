//! # Connection Manager
//!
//! [`ConnectionManager`] is the single owner of a serial link. It validates
//! parameters, opens the port through the circuit breaker, runs one reader
//! task per session, serialises writes, and tears everything down again on
//! request or on failure. Callers observe the link through [`LinkEvent`]s.
//!
//! ```text
//! connect ──> validate ──> breaker.call(open) ──> reader task ──> pump ──> subscribers
//! send    ──> lock ──> chunked write + flush
//! monitor ──> health tick (silent disconnect, port vanished) / stats tick
//! ```
//!
//! Lifecycle state, the port handle and the reader handle live behind one
//! async mutex. The reader itself never takes that lock; it only emits
//! [`reader::ReaderEvent`]s which the pump task turns into manager actions.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::LinkError;
use crate::logutil::escape_log;
use crate::params::ConnectionParams;
use crate::port::{
    lock_port_within, peek_open, share, DefaultClassifier, ErrorClassifier, PortBackend,
    PortHandle, PortInfo, SharedPort,
};
use crate::resilience::{BreakerError, BreakerState, CircuitBreaker, RetryPolicy};

pub mod events;
pub mod monitor;
pub mod reader;
pub mod stats;

pub use events::LinkEvent;
pub use monitor::HealthStatus;
pub use reader::ReaderSettings;
pub use stats::StatisticsSnapshot;

use events::EventHub;
use reader::{ReaderEvent, ReaderHandle};
use stats::Statistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Tunables for a [`ConnectionManager`]. See `config` for the file form.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    pub reader: ReaderSettings,
    pub breaker_threshold: u32,
    pub breaker_recovery: Duration,
    /// Applied to port enumeration.
    pub enumeration_retry: RetryPolicy,
    pub health_interval: Duration,
    pub stats_interval: Duration,
    /// How long a stopping reader gets before it is aborted.
    pub stop_grace: Duration,
    /// How long to wait for an aborted reader to go away.
    pub force_stop: Duration,
    pub max_payload: usize,
    pub write_chunk: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            reader: ReaderSettings::default(),
            breaker_threshold: 5,
            breaker_recovery: Duration::from_secs(30),
            enumeration_retry: RetryPolicy::default(),
            health_interval: Duration::from_secs(2),
            stats_interval: Duration::from_secs(1),
            stop_grace: Duration::from_secs(3),
            force_stop: Duration::from_secs(1),
            max_payload: 64 * 1024,
            write_chunk: 1024,
        }
    }
}

struct Session {
    id: u64,
    params: ConnectionParams,
    port: SharedPort,
    reader: ReaderHandle,
}

struct LinkState {
    state: ConnectionState,
    session: Option<Session>,
    breaker: CircuitBreaker,
    next_session: u64,
}

pub(crate) struct Shared {
    link: Mutex<LinkState>,
    events: EventHub,
    stats: Statistics,
    backend: Arc<dyn PortBackend>,
    classifier: Arc<dyn ErrorClassifier>,
    settings: LinkSettings,
    /// Id of the live session, 0 when there is none. The pump checks it and
    /// emits under this lock, so no data follows `ConnectionChanged(false)`.
    current_session: std::sync::Mutex<u64>,
    shut_down: AtomicBool,
}

impl Shared {
    fn session_gate(&self) -> MutexGuard<'_, u64> {
        self.current_session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Emit an error event and count it.
    pub(crate) fn report(&self, message: String) {
        error!("{}", escape_log(&message));
        self.stats.add_error();
        self.events.emit(LinkEvent::ErrorOccurred(message));
    }

    async fn connect(self: &Arc<Self>, params: ConnectionParams) -> Result<(), LinkError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(LinkError::ShutDown);
        }
        params.validate()?;

        let mut link = self.link.lock().await;
        if link.session.is_some() {
            info!("Already connected, closing the current session first");
            self.teardown(&mut link).await;
        }
        link.state = ConnectionState::Connecting;
        debug!("Connecting to {}", params);

        let opened = link.breaker.call(|| {
            self.backend
                .open(&params)
                .map_err(|source| LinkError::Open {
                    port: params.port.clone(),
                    source,
                })
        });
        let port = match opened {
            Ok(port) => share(port),
            Err(BreakerError::Open { retry_in }) => {
                link.state = ConnectionState::Disconnected;
                return Err(LinkError::CircuitOpen { retry_in });
            }
            Err(BreakerError::Inner(e)) => {
                link.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        // Nothing below can fail.
        link.next_session += 1;
        let id = link.next_session;
        self.stats.begin_session();
        *self.session_gate() = id;
        link.state = ConnectionState::Connected;
        self.events.emit(LinkEvent::ConnectionChanged(true));

        let (tx, rx) = mpsc::unbounded_channel();
        let reader = ReaderHandle::spawn(
            port.clone(),
            tx,
            self.classifier.clone(),
            self.settings.reader.clone(),
        );
        tokio::spawn(pump(Arc::downgrade(self), id, rx));
        info!(
            "Connected to {} ({} subscribers)",
            params,
            self.events.subscriber_count()
        );
        link.session = Some(Session {
            id,
            params,
            port,
            reader,
        });
        Ok(())
    }

    /// Stop the reader, close the port and announce the disconnect.
    /// Returns false when there was no session to tear down.
    async fn teardown(&self, link: &mut LinkState) -> bool {
        let Some(session) = link.session.take() else {
            link.state = ConnectionState::Disconnected;
            return false;
        };
        *self.session_gate() = 0;

        let outcome = session
            .reader
            .shutdown(self.settings.stop_grace, self.settings.force_stop)
            .await;
        debug!("Reader for session {} stopped: {:?}", session.id, outcome);

        // A forced stop can leave a driver call holding the port. The handle
        // is then released when that call returns and drops the last reference.
        match lock_port_within(&session.port, self.settings.force_stop).await {
            Some(mut port) => {
                if port.is_open() {
                    if let Err(e) = port.close() {
                        warn!("Error closing {}: {}", session.params.port, e);
                    }
                }
            }
            None => warn!(
                "{} still busy in the driver, leaving it to close on release",
                session.params.port
            ),
        }

        self.stats.end_session();
        link.state = ConnectionState::Disconnected;
        self.events.emit(LinkEvent::ConnectionChanged(false));
        info!("Disconnected from {}", session.params.port);
        true
    }

    async fn disconnect(&self) -> bool {
        let mut link = self.link.lock().await;
        self.teardown(&mut link).await
    }

    /// Tear down only if `id` is still the live session.
    pub(crate) async fn disconnect_session(&self, id: u64) -> bool {
        let mut link = self.link.lock().await;
        if !link.session.as_ref().is_some_and(|s| s.id == id) {
            return false;
        }
        self.teardown(&mut link).await
    }

    async fn send(&self, data: &[u8]) -> Result<bool, LinkError> {
        if data.is_empty() {
            debug!("Ignoring empty send");
            return Ok(false);
        }
        if data.len() > self.settings.max_payload {
            return Err(LinkError::PayloadTooLarge {
                size: data.len(),
                max: self.settings.max_payload,
            });
        }

        let link = self.link.lock().await;
        let session = match (&link.state, &link.session) {
            (ConnectionState::Connected, Some(session)) => session,
            _ => return Err(LinkError::NotConnected),
        };
        let write_timeout = session.params.write_timeout;
        let Some(mut port) = lock_port_within(&session.port, write_timeout).await else {
            return Err(LinkError::Write {
                written: 0,
                source: io::Error::new(io::ErrorKind::TimedOut, "port busy"),
            });
        };
        if !port.is_open() {
            return Err(LinkError::NotConnected);
        }

        let result = write_all(&mut **port, data, self.settings.write_chunk);
        let written = match &result {
            Ok(()) => data.len(),
            Err(e) => e.bytes_written(),
        };
        self.stats.add_tx(written);
        result.map(|()| {
            debug!("TX {} bytes to {}", written, session.params.port);
            true
        })
    }

    async fn is_connected(&self) -> bool {
        let link = self.link.lock().await;
        match (&link.state, &link.session) {
            // Busy means the reader is inside a call on it.
            (ConnectionState::Connected, Some(session)) => {
                peek_open(&session.port).unwrap_or(true)
            }
            _ => false,
        }
    }

    async fn port_details(&self) -> Result<Vec<PortInfo>, LinkError> {
        let backend = self.backend.clone();
        self.settings
            .enumeration_retry
            .run(
                "port enumeration",
                |e: &LinkError| matches!(e, LinkError::Enumerate(_)),
                || {
                    let backend = backend.clone();
                    async move { backend.available_ports().map_err(LinkError::Enumerate) }
                },
            )
            .await
    }
}

/// Write `data` in chunks of at most `chunk` bytes, flushing after each one.
fn write_all(
    port: &mut dyn PortHandle,
    data: &[u8],
    chunk: usize,
) -> Result<(), LinkError> {
    let mut written = 0;
    for piece in data.chunks(chunk.max(1)) {
        let mut offset = 0;
        while offset < piece.len() {
            match port.write(&piece[offset..]) {
                Ok(0) => {
                    return Err(LinkError::ZeroWrite {
                        written,
                        remaining: data.len() - written,
                    })
                }
                Ok(n) => {
                    offset += n;
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(LinkError::Write { written, source }),
            }
        }
        port.flush()
            .map_err(|source| LinkError::Write { written, source })?;
    }
    Ok(())
}

/// Turns reader events into manager actions for one session.
async fn pump(shared: Weak<Shared>, id: u64, mut rx: mpsc::UnboundedReceiver<ReaderEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match event {
            ReaderEvent::Data(bytes) => {
                let gate = shared.session_gate();
                if *gate != id {
                    continue;
                }
                shared.stats.add_rx(bytes.len());
                shared.events.emit(LinkEvent::DataReceived(bytes));
            }
            ReaderEvent::Error(message) => shared.report(message),
            ReaderEvent::ConnectionLost => {
                shared.disconnect_session(id).await;
            }
        }
    }
    debug!("Event pump for session {} finished", id);
}

/// Owner of one serial link. Cheap to clone; clones share the same link.
///
/// Must be created inside a Tokio runtime: construction spawns the health
/// monitor.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
    monitor: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl ConnectionManager {
    pub fn new(backend: Arc<dyn PortBackend>, settings: LinkSettings) -> Self {
        Self::with_classifier(backend, Arc::new(DefaultClassifier::default()), settings)
    }

    pub fn with_classifier(
        backend: Arc<dyn PortBackend>,
        classifier: Arc<dyn ErrorClassifier>,
        settings: LinkSettings,
    ) -> Self {
        let breaker = CircuitBreaker::new(settings.breaker_threshold, settings.breaker_recovery);
        let shared = Arc::new(Shared {
            link: Mutex::new(LinkState {
                state: ConnectionState::Disconnected,
                session: None,
                breaker,
                next_session: 0,
            }),
            events: EventHub::default(),
            stats: Statistics::default(),
            backend,
            classifier,
            settings,
            current_session: std::sync::Mutex::new(0),
            shut_down: AtomicBool::new(false),
        });
        let monitor = monitor::spawn(
            Arc::downgrade(&shared),
            shared.settings.health_interval,
            shared.settings.stats_interval,
        );
        Self {
            shared,
            monitor: Arc::new(std::sync::Mutex::new(Some(monitor))),
        }
    }

    /// Open a session with `params`, replacing any current one.
    ///
    /// Invalid parameters are rejected before the current session is touched.
    pub async fn connect(&self, params: ConnectionParams) -> Result<(), LinkError> {
        let port = params.port.clone();
        let result = self.shared.connect(params).await;
        if let Err(e) = &result {
            self.shared
                .report(format!("Connection to {} failed: {}", port, e));
        }
        result
    }

    /// Close the current session. Returns false if there was none.
    pub async fn disconnect(&self) -> bool {
        self.shared.disconnect().await
    }

    /// Write all of `data`. `Ok(false)` means `data` was empty and nothing happened.
    pub async fn send(&self, data: &[u8]) -> Result<bool, LinkError> {
        let result = self.shared.send(data).await;
        if let Err(e) = &result {
            self.shared.report(format!("Send failed: {}", e));
        }
        result
    }

    /// True only if the session is up and the port handle agrees.
    pub async fn is_connected(&self) -> bool {
        self.shared.is_connected().await
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.link.lock().await.state
    }

    /// Parameters of the live session, if any.
    pub async fn current_params(&self) -> Option<ConnectionParams> {
        let link = self.shared.link.lock().await;
        link.session.as_ref().map(|s| s.params.clone())
    }

    pub async fn breaker_state(&self) -> BreakerState {
        self.shared.link.lock().await.breaker.state()
    }

    /// Names of the ports the host currently exposes.
    pub async fn get_available_ports(&self) -> Result<Vec<String>, LinkError> {
        let ports = self.get_port_details().await?;
        Ok(ports.into_iter().map(|p| p.name).collect())
    }

    /// Full records of the ports the host currently exposes, sorted.
    pub async fn get_port_details(&self) -> Result<Vec<PortInfo>, LinkError> {
        let result = self.shared.port_details().await;
        if let Err(e) = &result {
            self.shared.report(format!("Failed to list ports: {}", e));
        }
        result
    }

    /// Record for `name`, or [`PortInfo::missing`] when it is not present.
    pub async fn get_port_info(&self, name: &str) -> Result<PortInfo, LinkError> {
        let ports = self.get_port_details().await?;
        Ok(ports
            .into_iter()
            .find(|p| p.name == name)
            .unwrap_or_else(|| PortInfo::missing(name)))
    }

    pub async fn get_statistics(&self) -> StatisticsSnapshot {
        let connected = self.is_connected().await;
        self.shared.stats.snapshot(connected)
    }

    /// Zero the counters. The uptime clock restarts if a session is live.
    pub async fn reset_statistics(&self) {
        let link = self.shared.link.lock().await;
        let connected = link.state == ConnectionState::Connected;
        self.shared.stats.reset(connected);
        debug!("Statistics reset");
    }

    /// New event stream. Events emitted before this call are not replayed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    /// Run one health check now, independent of the periodic monitor.
    pub async fn check_health(&self) -> HealthStatus {
        monitor::check_health(&self.shared).await
    }

    /// Stop the monitor and close any session. Later `connect` calls fail
    /// with [`LinkError::ShutDown`]. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = monitor {
            handle.abort();
        }
        self.shared.disconnect().await;
        info!("Connection manager shut down");
    }
}
