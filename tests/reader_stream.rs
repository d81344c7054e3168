mod common;

use std::io;
use std::time::Duration;

use common::{connection_changes, drain, next_event, params, sim_manager};
use serialkeeper::link::LinkEvent;
use tokio_test::assert_ok;

#[tokio::test(start_paused = true)]
async fn chunks_arrive_in_order() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    let mut rx = mgr.subscribe();
    assert_ok!(mgr.connect(params("SIM0")).await);
    assert_eq!(next_event(&mut rx).await, LinkEvent::ConnectionChanged(true));

    let device = backend.device("SIM0").expect("device");
    device.push_inbound(b"A");
    device.push_inbound(b"B");
    device.push_inbound(b"C");

    let mut received = Vec::new();
    while received.len() < 3 {
        if let LinkEvent::DataReceived(bytes) = next_event(&mut rx).await {
            received.push(bytes);
        }
    }
    assert_eq!(received, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);
    assert_eq!(mgr.get_statistics().await.rx_bytes, 3);
}

#[tokio::test(start_paused = true)]
async fn large_input_is_split_at_the_chunk_size() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    let mut rx = mgr.subscribe();
    assert_ok!(mgr.connect(params("SIM0")).await);

    let blob: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
    backend.device("SIM0").expect("device").push_inbound(&blob);

    let mut joined = Vec::new();
    while joined.len() < blob.len() {
        if let LinkEvent::DataReceived(bytes) = next_event(&mut rx).await {
            assert!(bytes.len() <= 4096);
            joined.extend(bytes);
        }
    }
    assert_eq!(joined, blob);
}

#[tokio::test(start_paused = true)]
async fn device_removal_is_fatal_and_tears_down() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    let mut rx = mgr.subscribe();
    assert_ok!(mgr.connect(params("SIM0")).await);
    assert_eq!(next_event(&mut rx).await, LinkEvent::ConnectionChanged(true));

    let device = backend.device("SIM0").expect("device");
    device.fail_reads([io::Error::new(
        io::ErrorKind::PermissionDenied,
        "Access denied (os error 22)",
    )]);

    assert_eq!(
        next_event(&mut rx).await,
        LinkEvent::ErrorOccurred("USB device disconnected".to_string())
    );
    assert_eq!(next_event(&mut rx).await, LinkEvent::ConnectionChanged(false));
    assert!(!mgr.is_connected().await);
    assert!(!device.is_open());
}

#[tokio::test(start_paused = true)]
async fn driver_failure_marker_is_fatal() {
    let (backend, mgr) = sim_manager(&["COM4"]);
    let mut rx = mgr.subscribe();
    assert_ok!(mgr.connect(params("COM4")).await);

    backend.device("COM4").expect("device").fail_reads([io::Error::new(
        io::ErrorKind::Other,
        "ClearCommError failed (Error 22)",
    )]);

    match next_event(&mut rx).await {
        LinkEvent::ConnectionChanged(true) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        next_event(&mut rx).await,
        LinkEvent::ErrorOccurred(msg) if msg.contains("check the connection")
    ));
    assert_eq!(next_event(&mut rx).await, LinkEvent::ConnectionChanged(false));
}

#[tokio::test(start_paused = true)]
async fn repeated_generic_errors_escalate() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    let mut rx = mgr.subscribe();
    assert_ok!(mgr.connect(params("SIM0")).await);
    assert_eq!(next_event(&mut rx).await, LinkEvent::ConnectionChanged(true));

    backend
        .device("SIM0")
        .expect("device")
        .fail_reads((0..5).map(|_| io::Error::new(io::ErrorKind::Other, "parity error")));

    match next_event(&mut rx).await {
        LinkEvent::ErrorOccurred(msg) => {
            assert!(msg.contains("Too many consecutive read errors"), "{}", msg)
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(next_event(&mut rx).await, LinkEvent::ConnectionChanged(false));
}

#[tokio::test(start_paused = true)]
async fn suspect_errors_are_promoted_after_three() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    let mut rx = mgr.subscribe();
    assert_ok!(mgr.connect(params("SIM0")).await);

    backend.device("SIM0").expect("device").fail_reads(
        (0..3).map(|_| io::Error::new(io::ErrorKind::PermissionDenied, "access denied")),
    );

    loop {
        match next_event(&mut rx).await {
            LinkEvent::ErrorOccurred(msg) => {
                assert_eq!(msg, "Device disconnected");
                break;
            }
            LinkEvent::ConnectionChanged(true) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(next_event(&mut rx).await, LinkEvent::ConnectionChanged(false));
}

#[tokio::test(start_paused = true)]
async fn transient_errors_do_not_drop_the_link() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    let mut rx = mgr.subscribe();
    assert_ok!(mgr.connect(params("SIM0")).await);

    let device = backend.device("SIM0").expect("device");
    device.fail_reads((0..3).map(|_| io::Error::new(io::ErrorKind::Other, "overrun")));
    device.fail_reads([io::Error::new(io::ErrorKind::TimedOut, "read timed out")]);
    device.push_inbound(b"after");

    loop {
        if let LinkEvent::DataReceived(bytes) = next_event(&mut rx).await {
            assert_eq!(bytes, b"after");
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(connection_changes(&drain(&mut rx)).is_empty());
    assert!(mgr.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn explicit_disconnect_stops_delivery() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    let mut rx = mgr.subscribe();
    assert_ok!(mgr.connect(params("SIM0")).await);
    let device = backend.device("SIM0").expect("device");

    assert!(mgr.disconnect().await);
    device.push_inbound(b"late");
    tokio::time::sleep(Duration::from_secs(1)).await;

    let events = drain(&mut rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, LinkEvent::DataReceived(_))));
    assert_eq!(connection_changes(&events), vec![true, false]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_data_after_disconnect_under_load() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    let device = backend.device("SIM0").expect("device");

    for _ in 0..20 {
        let mut rx = mgr.subscribe();
        assert_ok!(mgr.connect(params("SIM0")).await);
        for i in 0..200u8 {
            device.push_inbound(&[i]);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(mgr.disconnect().await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let events = drain(&mut rx);
        let closed_at = events
            .iter()
            .position(|e| *e == LinkEvent::ConnectionChanged(false))
            .expect("disconnect announced");
        assert!(
            !events[closed_at..]
                .iter()
                .any(|e| matches!(e, LinkEvent::DataReceived(_))),
            "data delivered after ConnectionChanged(false)"
        );
    }
}
