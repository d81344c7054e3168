//! Periodic liveness checks and statistics broadcasts.
//!
//! A read loop only notices a dead device when a read fails. Some drivers keep
//! the handle "open" after the device is gone, or close it without reporting
//! an error, so the monitor looks at the link from the outside on a fixed
//! period. Any failure of the check itself counts as a disconnect.

use std::sync::Weak;
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::{ConnectionState, LinkEvent, Shared};
use crate::port::peek_open;

/// Result of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// No live session; nothing was checked.
    Idle,
    Healthy,
    /// The handle reported itself closed while the link was up.
    SilentDisconnect,
    /// The port disappeared from the host's enumeration.
    PortVanished,
    /// Enumeration failed, treated as a disconnect.
    CheckFailed,
}

pub(crate) fn spawn(
    shared: Weak<Shared>,
    health_every: Duration,
    stats_every: Duration,
) -> JoinHandle<()> {
    let health_every = health_every.max(Duration::from_millis(1));
    let stats_every = stats_every.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut health = interval_at(Instant::now() + health_every, health_every);
        health.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats = interval_at(Instant::now() + stats_every, stats_every);
        stats.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = health.tick() => {
                    let Some(shared) = shared.upgrade() else { break };
                    let status = check_health(&shared).await;
                    if status != HealthStatus::Idle && status != HealthStatus::Healthy {
                        debug!("Health check: {:?}", status);
                    }
                }
                _ = stats.tick() => {
                    let Some(shared) = shared.upgrade() else { break };
                    if shared.is_connected().await {
                        let snapshot = shared.stats.snapshot(true);
                        shared.events.emit(LinkEvent::StatisticsUpdated(snapshot));
                    }
                }
            }
        }
        debug!("Monitor stopped, connection manager dropped");
    })
}

/// Check the live session, tearing it down if the device looks gone.
pub(crate) async fn check_health(shared: &Shared) -> HealthStatus {
    let (id, port_name, open) = {
        let link = shared.link.lock().await;
        match (&link.state, &link.session) {
            (ConnectionState::Connected, Some(session)) => (
                session.id,
                session.params.port.clone(),
                // A busy port is in use by the reader, so not silently closed.
                peek_open(&session.port).unwrap_or(true),
            ),
            _ => return HealthStatus::Idle,
        }
    };

    if !open {
        warn!("Silent disconnect detected on {}", port_name);
        shared.report(format!(
            "Connection to {} lost: port closed unexpectedly",
            port_name
        ));
        shared.disconnect_session(id).await;
        return HealthStatus::SilentDisconnect;
    }

    match shared.backend.available_ports() {
        Ok(ports) if ports.iter().any(|p| p.name == port_name) => HealthStatus::Healthy,
        Ok(_) => {
            warn!("{} vanished from the port list", port_name);
            shared.report(format!("Port {} is no longer available", port_name));
            shared.disconnect_session(id).await;
            HealthStatus::PortVanished
        }
        Err(e) => {
            shared.report(format!("Health check failed for {}: {}", port_name, e));
            shared.disconnect_session(id).await;
            HealthStatus::CheckFailed
        }
    }
}
