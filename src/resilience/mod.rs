//! Failure guards wrapped around fallible link operations.
//!
//! - [`retry`]: re-invoke an operation with exponential backoff
//! - [`breaker`]: stop calling an operation that keeps failing until a cool-down elapses

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerError, BreakerState, CircuitBreaker};
pub use retry::RetryPolicy;
