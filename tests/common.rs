//! Test utilities & fixtures.
//! Builds connection managers over the in-memory simulator and collects events.
#![allow(dead_code)] // Each test binary uses a different subset.

use std::sync::Arc;
use std::time::Duration;

use serialkeeper::link::{ConnectionManager, LinkEvent, LinkSettings};
use serialkeeper::params::ConnectionParams;
use serialkeeper::port::sim::SimBackend;
use tokio::sync::mpsc::UnboundedReceiver;

/// Simulated host with `ports` attached and a manager driving it.
pub fn sim_manager(ports: &[&str]) -> (SimBackend, ConnectionManager) {
    sim_manager_with(ports, LinkSettings::default())
}

pub fn sim_manager_with(ports: &[&str], settings: LinkSettings) -> (SimBackend, ConnectionManager) {
    let backend = SimBackend::new();
    for port in ports {
        backend.attach(port);
    }
    let manager = ConnectionManager::new(Arc::new(backend.clone()), settings);
    (backend, manager)
}

pub fn params(port: &str) -> ConnectionParams {
    ConnectionParams::new(port, 115200)
}

/// Next event other than a periodic statistics update.
pub async fn next_event(rx: &mut UnboundedReceiver<LinkEvent>) -> LinkEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timeout waiting for event")
            .expect("event channel closed");
        if !matches!(event, LinkEvent::StatisticsUpdated(_)) {
            return event;
        }
    }
}

/// Everything already queued, without waiting.
pub fn drain(rx: &mut UnboundedReceiver<LinkEvent>) -> Vec<LinkEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// The `ConnectionChanged` values among `events`, in order.
pub fn connection_changes(events: &[LinkEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|e| match e {
            LinkEvent::ConnectionChanged(up) => Some(*up),
            _ => None,
        })
        .collect()
}
