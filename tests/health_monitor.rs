mod common;

use std::time::Duration;

use common::{connection_changes, drain, next_event, params, sim_manager};
use serialkeeper::link::{HealthStatus, LinkEvent};
use tokio_test::assert_ok;

#[tokio::test(start_paused = true)]
async fn silent_disconnect_yields_exactly_one_change() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    let mut rx = mgr.subscribe();
    assert_ok!(mgr.connect(params("SIM0")).await);
    assert_eq!(next_event(&mut rx).await, LinkEvent::ConnectionChanged(true));

    // Handle says closed, no I/O error anywhere.
    backend.device("SIM0").expect("device").drop_silently();
    assert!(!mgr.is_connected().await);

    match next_event(&mut rx).await {
        LinkEvent::ErrorOccurred(msg) => assert!(msg.contains("closed unexpectedly"), "{}", msg),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(next_event(&mut rx).await, LinkEvent::ConnectionChanged(false));

    // Several more ticks: nothing else happens.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(connection_changes(&drain(&mut rx)).is_empty());
    assert_eq!(mgr.check_health().await, HealthStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn detection_happens_on_the_next_tick() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    let mut rx = mgr.subscribe();
    assert_ok!(mgr.connect(params("SIM0")).await);
    backend.device("SIM0").expect("device").drop_silently();

    // Health interval is 2s; nothing before it.
    tokio::time::sleep(Duration::from_millis(1900)).await;
    assert_eq!(connection_changes(&drain(&mut rx)), vec![true]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(connection_changes(&drain(&mut rx)), vec![false]);
}

#[tokio::test(start_paused = true)]
async fn vanished_port_is_reported_and_disconnected() {
    let (backend, mgr) = sim_manager(&["/dev/ttyACM0"]);
    let mut rx = mgr.subscribe();
    assert_ok!(mgr.connect(params("/dev/ttyACM0")).await);
    let device = backend.device("/dev/ttyACM0").expect("device");
    assert_eq!(next_event(&mut rx).await, LinkEvent::ConnectionChanged(true));

    backend.unplug("/dev/ttyACM0");

    assert_eq!(
        next_event(&mut rx).await,
        LinkEvent::ErrorOccurred("Port /dev/ttyACM0 is no longer available".to_string())
    );
    assert_eq!(next_event(&mut rx).await, LinkEvent::ConnectionChanged(false));
    assert!(!device.is_open());
    assert!(!mgr.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn manual_check_on_a_healthy_link() {
    let (_backend, mgr) = sim_manager(&["SIM0"]);
    assert_ok!(mgr.connect(params("SIM0")).await);
    assert_eq!(mgr.check_health().await, HealthStatus::Healthy);

    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(mgr.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_silent_disconnect() {
    let (backend, mgr) = sim_manager(&["SIM0"]);
    let mut rx = mgr.subscribe();
    assert_ok!(mgr.connect(params("SIM0")).await);
    backend.device("SIM0").expect("device").drop_silently();

    loop {
        if next_event(&mut rx).await == LinkEvent::ConnectionChanged(false) {
            break;
        }
    }
    assert_ok!(mgr.connect(params("SIM0")).await);
    assert!(mgr.is_connected().await);
}
