//! Link traffic counters.
//!
//! `rx_bytes` is only bumped by the reader's forwarding path and `tx_bytes`
//! only by `send`, so each direction has a single writer. Counters only ever
//! grow between resets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub uptime_seconds: f64,
    pub connected: bool,
    pub error_count: u64,
    /// Wall-clock time the current session started (or was last re-based).
    pub connected_since: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub(crate) struct Statistics {
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    error_count: AtomicU64,
    started: Mutex<Option<(Instant, DateTime<Utc>)>>,
}

impl Statistics {
    pub(crate) fn add_rx(&self, n: usize) {
        self.rx_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_tx(&self, n: usize) {
        self.tx_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Fresh session: zero the traffic counters and start the uptime clock.
    pub(crate) fn begin_session(&self) {
        self.rx_bytes.store(0, Ordering::Relaxed);
        self.tx_bytes.store(0, Ordering::Relaxed);
        *self.started_lock() = Some((Instant::now(), Utc::now()));
    }

    pub(crate) fn end_session(&self) {
        *self.started_lock() = None;
    }

    /// Zero all counters; re-base the uptime clock if a session is live.
    pub(crate) fn reset(&self, connected: bool) {
        self.rx_bytes.store(0, Ordering::Relaxed);
        self.tx_bytes.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        *self.started_lock() = connected.then(|| (Instant::now(), Utc::now()));
    }

    pub(crate) fn snapshot(&self, connected: bool) -> StatisticsSnapshot {
        let started = *self.started_lock();
        StatisticsSnapshot {
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            uptime_seconds: started.map_or(0.0, |(at, _)| at.elapsed().as_secs_f64()),
            connected,
            error_count: self.error_count.load(Ordering::Relaxed),
            connected_since: started.map(|(_, wall)| wall),
        }
    }

    fn started_lock(&self) -> std::sync::MutexGuard<'_, Option<(Instant, DateTime<Utc>)>> {
        self.started.lock().unwrap_or_else(|e| e.into_inner())
    }
}
