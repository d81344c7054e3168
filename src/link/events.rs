//! Outbound event delivery.
//!
//! Each subscriber gets its own unbounded channel, so a slow consumer never
//! blocks the link and events reach every subscriber in emission order. The
//! receiving side decides which thread or task handles them.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;

use super::stats::StatisticsSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum LinkEvent {
    /// Raw bytes, exactly as read from the device.
    DataReceived(Vec<u8>),
    ConnectionChanged(bool),
    /// Human-readable failure description.
    ErrorOccurred(String),
    StatisticsUpdated(StatisticsSnapshot),
}

#[derive(Default)]
pub(crate) struct EventHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<LinkEvent>>>,
}

impl EventHub {
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<LinkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, forgetting the ones that hung up.
    pub(crate) fn emit(&self, event: LinkEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<LinkEvent>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
