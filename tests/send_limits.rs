mod common;

use std::io;

use common::{drain, params, sim_manager};
use serialkeeper::link::LinkEvent;
use serialkeeper::LinkError;
use tokio_test::{assert_err, assert_ok};

#[tokio::test(start_paused = true)]
async fn empty_payload_is_a_quiet_no_op() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    assert_ok!(mgr.connect(params("SIM0")).await);
    let mut rx = mgr.subscribe();

    assert_eq!(assert_ok!(mgr.send(&[]).await), false);
    let device = backend.device("SIM0").expect("device");
    assert_eq!(device.write_calls(), 0);
    assert!(drain(&mut rx).is_empty());
    assert_eq!(mgr.get_statistics().await.error_count, 0);
}

#[tokio::test(start_paused = true)]
async fn oversized_payload_is_rejected_before_writing() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    assert_ok!(mgr.connect(params("SIM0")).await);
    let mut rx = mgr.subscribe();

    let err = assert_err!(mgr.send(&vec![0xAA; 70_000]).await);
    assert!(matches!(
        err,
        LinkError::PayloadTooLarge {
            size: 70_000,
            max: 65_536
        }
    ));
    assert_eq!(backend.device("SIM0").expect("device").write_calls(), 0);
    assert_eq!(mgr.get_statistics().await.tx_bytes, 0);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, LinkEvent::ErrorOccurred(_))));
}

#[tokio::test(start_paused = true)]
async fn exact_limit_is_accepted() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    assert_ok!(mgr.connect(params("SIM0")).await);
    assert!(assert_ok!(mgr.send(&vec![1u8; 65_536]).await));
    assert_eq!(backend.device("SIM0").expect("device").written().len(), 65_536);
}

#[tokio::test(start_paused = true)]
async fn thousand_bytes_count_exactly() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    assert_ok!(mgr.connect(params("SIM0")).await);
    let before = mgr.get_statistics().await.tx_bytes;

    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    assert!(assert_ok!(mgr.send(&payload).await));

    assert_eq!(mgr.get_statistics().await.tx_bytes - before, 1000);
    let device = backend.device("SIM0").expect("device");
    assert_eq!(device.written(), payload);
    assert_eq!(device.flushes(), 1);
}

#[tokio::test(start_paused = true)]
async fn zero_byte_write_is_a_failure() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    assert_ok!(mgr.connect(params("SIM0")).await);
    let device = backend.device("SIM0").expect("device");
    device.stall_writes_after(Some(10));

    let err = assert_err!(mgr.send(&[7u8; 100]).await);
    assert!(matches!(
        err,
        LinkError::ZeroWrite {
            written: 10,
            remaining: 90
        }
    ));
    assert_eq!(err.bytes_written(), 10);
    assert_eq!(mgr.get_statistics().await.tx_bytes, 10);
    assert_eq!(mgr.get_statistics().await.error_count, 1);
    // A failed write does not tear the link down.
    assert!(mgr.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn write_error_is_reported() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    assert_ok!(mgr.connect(params("SIM0")).await);
    let mut rx = mgr.subscribe();
    backend
        .device("SIM0")
        .expect("device")
        .fail_writes(Some(io::ErrorKind::TimedOut));

    let err = assert_err!(mgr.send(b"ping").await);
    assert!(matches!(err, LinkError::Write { written: 0, .. }));
    match drain(&mut rx).first() {
        Some(LinkEvent::ErrorOccurred(msg)) => assert!(msg.starts_with("Send failed")),
        other => panic!("expected error event, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn send_requires_a_connection() {
    let (_backend, mgr) = sim_manager(&["SIM0"]);
    assert!(matches!(
        mgr.send(b"x").await,
        Err(LinkError::NotConnected)
    ));

    assert_ok!(mgr.connect(params("SIM0")).await);
    assert!(mgr.disconnect().await);
    assert!(matches!(
        mgr.send(b"x").await,
        Err(LinkError::NotConnected)
    ));
}
