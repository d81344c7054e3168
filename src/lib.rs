//! # serialkeeper - resilient serial link management
//!
//! serialkeeper keeps a byte-oriented serial device link usable on flaky
//! hardware: it opens and closes the port, streams inbound bytes from a
//! background task, serialises writes, and survives transient I/O errors,
//! USB unplugs and ports that die without saying so.
//!
//! ## Features
//!
//! - **Single owner**: [`link::ConnectionManager`] holds the port, the reader task and the state behind one lock.
//! - **Circuit breaker**: repeated failed connects are refused for a cool-down instead of hammering the device.
//! - **Backoff retries**: port enumeration retries transient failures with exponential backoff.
//! - **Reader task**: polls for input, forwards chunks in order, classifies read errors (removal vs. hiccup).
//! - **Health monitor**: detects silent disconnects and vanished ports and tears the link down cleanly.
//! - **Typed events**: data, connection changes, errors and statistics arrive on per-subscriber channels.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use serialkeeper::link::{ConnectionManager, LinkEvent, LinkSettings};
//! use serialkeeper::params::ConnectionParams;
//! use serialkeeper::port::system::SystemBackend;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = ConnectionManager::new(Arc::new(SystemBackend::new()), LinkSettings::default());
//!     let mut events = manager.subscribe();
//!
//!     manager.connect(ConnectionParams::new("/dev/ttyUSB0", 115200)).await?;
//!     manager.send(b"hello\r\n").await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let LinkEvent::DataReceived(bytes) = event {
//!             println!("{:?}", bytes);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`params`] - connection parameters and validation
//! - [`error`] - error types
//! - [`resilience`] - backoff retrier and circuit breaker
//! - [`port`] - port backends (host serial ports, simulator) and error classification
//! - [`link`] - connection manager, reader task, health monitor, events, statistics
//! - [`config`] - TOML configuration
//! - [`logutil`] - log sanitising helpers
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  connect/send   ┌──────────────────────┐  open/write  ┌─────────────┐
//! │   caller     │ ──────────────> │  ConnectionManager   │ ───────────> │ PortBackend │
//! │ (CLI / UI)   │ <────────────── │  breaker + stats     │              │ PortHandle  │
//! └──────────────┘   LinkEvents    └──────────────────────┘              └─────────────┘
//!                                    ^          ^                               │
//!                                    │ pump     │ health/stats ticks            │ poll
//!                               ┌────┴────┐ ┌───┴─────┐                   ┌─────┴─────┐
//!                               │ events  │ │ monitor │                   │  reader   │
//!                               └─────────┘ └─────────┘                   └───────────┘
//! ```

pub mod config;
pub mod error;
pub mod link;
pub mod logutil;
pub mod params;
pub mod port;
pub mod resilience;

pub use error::{LinkError, ParamError};
pub use link::{ConnectionManager, ConnectionState, LinkEvent, LinkSettings, StatisticsSnapshot};
pub use params::ConnectionParams;
