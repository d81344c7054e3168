//! Circuit breaker guarding the connect operation.
//!
//! ```text
//! Closed   --(failure_count >= threshold)-->  Open
//! Open     --(recovery_timeout elapsed)---->  HalfOpen   (one trial call)
//! HalfOpen --(trial succeeds)-------------->  Closed     (failure_count = 0)
//! HalfOpen --(trial fails)----------------->  Open       (last_failure refreshed)
//! ```
//!
//! The breaker lives as long as its connection manager, so it tracks the health
//! of connecting across many sessions rather than of a single one.

use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of [`CircuitBreaker::call`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Rejected without invoking the operation.
    Open { retry_in: Duration },
    /// The operation ran and failed.
    Inner(E),
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    failure_threshold: u32,
    recovery_timeout: Duration,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure: None,
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            trial_in_flight: false,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    /// Ask permission for one call. `Err` carries the time left until the next trial.
    ///
    /// Every `Ok` must be followed by exactly one [`record_success`](Self::record_success)
    /// or [`record_failure`](Self::record_failure).
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        match self.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen if self.trial_in_flight => Err(Duration::ZERO),
            BreakerState::HalfOpen => {
                self.trial_in_flight = true;
                Ok(())
            }
            BreakerState::Open => {
                let elapsed = self
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.recovery_timeout);
                if elapsed >= self.recovery_timeout {
                    info!("Circuit breaker half-open, allowing one trial call");
                    self.state = BreakerState::HalfOpen;
                    self.trial_in_flight = true;
                    Ok(())
                } else {
                    Err(self.recovery_timeout - elapsed)
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            info!("Circuit breaker closed after successful trial");
        }
        self.failure_count = 0;
        self.state = BreakerState::Closed;
        self.trial_in_flight = false;
    }

    pub fn record_failure(&mut self) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure = Some(Instant::now());
        self.trial_in_flight = false;
        match self.state {
            BreakerState::HalfOpen => {
                warn!("Circuit breaker trial failed, re-opening");
                self.state = BreakerState::Open;
            }
            BreakerState::Closed if self.failure_count >= self.failure_threshold => {
                warn!(
                    "Circuit breaker opened after {} consecutive failures",
                    self.failure_count
                );
                self.state = BreakerState::Open;
            }
            _ => {}
        }
    }

    /// Run `op` through the breaker.
    pub fn call<T, E>(&mut self, op: impl FnOnce() -> Result<T, E>) -> Result<T, BreakerError<E>> {
        self.try_acquire()
            .map_err(|retry_in| BreakerError::Open { retry_in })?;
        match op() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }
}
