mod common;

use std::cell::Cell;
use std::time::Duration;

use common::sim_manager;
use serialkeeper::resilience::RetryPolicy;
use serialkeeper::LinkError;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

#[derive(Debug, PartialEq)]
enum Failure {
    Flaky,
    Fatal,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[tokio::test(start_paused = true)]
async fn fails_twice_then_succeeds_in_three_calls() {
    let policy = RetryPolicy::default();
    let calls = Cell::new(0u32);
    let start = Instant::now();

    let result = policy
        .run(
            "flaky op",
            |e: &Failure| *e == Failure::Flaky,
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n <= 2 {
                        Err(Failure::Flaky)
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

    assert_eq!(result, Ok(3));
    assert_eq!(calls.get(), 3);
    // 100ms + 200ms of backoff
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(300) && waited < Duration::from_millis(320));
}

#[tokio::test(start_paused = true)]
async fn last_error_is_returned_after_exhausting_retries() {
    let policy = RetryPolicy {
        max_retries: 3,
        initial_delay: Duration::from_millis(10),
        backoff_factor: 3.0,
        max_delay: Duration::from_millis(50),
    };
    let calls = Cell::new(0u32);
    let result: Result<(), Failure> = policy
        .run("always flaky", |_| true, || {
            calls.set(calls.get() + 1);
            async { Err(Failure::Flaky) }
        })
        .await;
    assert_eq!(result, Err(Failure::Flaky));
    assert_eq!(calls.get(), 4);
}

#[tokio::test(start_paused = true)]
async fn non_retryable_error_propagates_immediately() {
    let policy = RetryPolicy::default();
    let calls = Cell::new(0u32);
    let start = Instant::now();
    let result: Result<(), Failure> = policy
        .run(
            "fatal op",
            |e: &Failure| *e == Failure::Flaky,
            || {
                calls.set(calls.get() + 1);
                async { Err(Failure::Fatal) }
            },
        )
        .await;
    assert_eq!(result, Err(Failure::Fatal));
    assert_eq!(calls.get(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn port_enumeration_is_retried() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    backend.fail_enumerations(2);
    let ports = assert_ok!(mgr.get_available_ports().await);
    assert_eq!(ports, vec!["SIM0"]);
    assert_eq!(backend.enumerations(), 3);
}

#[tokio::test(start_paused = true)]
async fn port_enumeration_gives_up_after_three_retries() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    backend.fail_enumerations(10);
    let err = assert_err!(mgr.get_available_ports().await);
    assert!(matches!(err, LinkError::Enumerate(_)));
    assert_eq!(backend.enumerations(), 4);
    assert_eq!(mgr.get_statistics().await.error_count, 1);
}
