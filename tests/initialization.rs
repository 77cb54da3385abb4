// tests/initialization.rs
//! Bring-up sequence against a scripted host

mod common;

use common::{device_config, ScriptedConnection};
use gemlink::{
    ControlState, DefinitionCatalog, EquipmentState, EventBus, InitializationState, Initializer,
    ProcessState, StateTriad,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn build(
    conn: Arc<ScriptedConnection>,
    configure: impl FnOnce(&mut gemlink::DeviceConfig),
) -> (Initializer, Arc<StateTriad>) {
    let mut config = device_config("EQ1");
    configure(&mut config);
    let events = EventBus::new();
    let triad = Arc::new(StateTriad::new("EQ1", events.clone()));
    let init = Initializer::new(
        config,
        conn,
        triad.clone(),
        Arc::new(DefinitionCatalog::standard()),
        events,
    );
    (init, triad)
}

#[tokio::test(start_paused = true)]
async fn silent_host_still_completes() {
    let conn = Arc::new(ScriptedConnection::silent_host());
    let (init, triad) = build(conn.clone(), |_| {});

    let outcome = init.initialize(&CancellationToken::new()).await;

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(init.state(), InitializationState::Completed);
    assert_eq!(init.progress(), 100);
    // 60s handshake wait plus 30s online wait, both non-fatal
    assert!(outcome.elapsed >= Duration::from_secs(90));

    let snapshot = triad.snapshot();
    assert!(!snapshot.communication_established);
    assert_eq!(snapshot.control_state, ControlState::EquipmentOffline);
    assert_eq!(snapshot.process_state, ProcessState::Idle);
    assert_eq!(snapshot.equipment_state, EquipmentState::Standby);
    assert_eq!(conn.starts.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_initialize_is_rejected() {
    let conn = Arc::new(ScriptedConnection::silent_host());
    let (init, _) = build(conn, |_| {});
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(init.initialize(&cancel), init.initialize(&cancel));

    assert!(first.success);
    assert!(!second.success);
    assert_eq!(second.message, "initialization already in progress");
}

#[tokio::test(start_paused = true)]
async fn late_handshake_is_observed() {
    let conn = Arc::new(ScriptedConnection::silent_host());
    let (init, triad) = build(conn.clone(), |_| {});

    let host = conn.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        host.complete_handshake();
    });

    assert!(init.initialize(&CancellationToken::new()).await.success);
    assert!(triad.communication_established());
}

#[tokio::test(start_paused = true)]
async fn failed_initialization_can_rerun() {
    let conn = Arc::new(ScriptedConnection::new());
    let (init, triad) = build(conn, |_| {});
    let cancel = CancellationToken::new();

    triad.report_equipment_failure("door interlock");
    let first = init.initialize(&cancel).await;
    assert!(!first.success);
    assert_eq!(init.state(), InitializationState::Failed);

    triad.report_equipment_repaired();
    let second = init.initialize(&cancel).await;
    assert!(second.success, "{}", second.message);
    assert_eq!(init.state(), InitializationState::Completed);
}

#[tokio::test(start_paused = true)]
async fn startup_online_request_retries_until_accepted() {
    let conn = Arc::new(ScriptedConnection::new());
    conn.online_codes.lock().extend([1, 1, 0]);
    let (init, triad) = build(conn.clone(), |config| {
        config.initialization.request_online_on_startup = true;
        config.initialization.remote_on_startup = false;
    });

    assert!(init.initialize(&CancellationToken::new()).await.success);
    assert_eq!(triad.control_state(), ControlState::OnlineLocal);
    assert!(conn.online_codes.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn startup_online_refusal_leaves_device_offline() {
    let conn = Arc::new(ScriptedConnection::new());
    conn.online_codes.lock().extend([1, 1, 1, 1, 1]);
    let (init, triad) = build(conn, |config| {
        config.initialization.request_online_on_startup = true;
    });

    let outcome = init.initialize(&CancellationToken::new()).await;
    assert!(outcome.success);
    assert_eq!(triad.control_state(), ControlState::HostOffline);
    assert!(!triad.is_online());
}

#[tokio::test(start_paused = true)]
async fn online_request_after_refusal_reaches_online() {
    let conn = Arc::new(ScriptedConnection::new());
    conn.online_codes.lock().extend([1, 1, 1, 1, 1]);
    let (init, triad) = build(conn.clone(), |config| {
        config.initialization.request_online_on_startup = true;
    });
    assert!(init.initialize(&CancellationToken::new()).await.success);
    assert_eq!(triad.control_state(), ControlState::HostOffline);

    // the host now accepts
    let result = init.request_online().await;
    assert!(result.success, "{}", result.message);
    assert_eq!(triad.control_state(), ControlState::OnlineRemote);
}

#[tokio::test(start_paused = true)]
async fn handshake_after_window_is_still_accepted() {
    let conn = Arc::new(ScriptedConnection::silent_host());
    let (init, triad) = build(conn.clone(), |_| {});

    assert!(init.initialize(&CancellationToken::new()).await.success);
    assert!(!triad.communication_established());
    assert!(!triad.request_online(true));

    conn.complete_handshake();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(triad.communication_established());
    assert!(triad.request_online(true));
    assert_eq!(triad.control_state(), ControlState::OnlineRemote);
}

#[tokio::test(start_paused = true)]
async fn reset_stops_waiting_for_late_handshake() {
    let conn = Arc::new(ScriptedConnection::silent_host());
    let (init, triad) = build(conn.clone(), |_| {});

    assert!(init.initialize(&CancellationToken::new()).await.success);
    assert!(init.reset());

    conn.complete_handshake();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!triad.communication_established());
}

#[tokio::test(start_paused = true)]
async fn transport_start_failure_is_not_fatal() {
    let conn = Arc::new(ScriptedConnection::new());
    conn.fail_start.store(true, std::sync::atomic::Ordering::SeqCst);
    let (init, triad) = build(conn.clone(), |_| {});

    let outcome = init.initialize(&CancellationToken::new()).await;

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(init.state(), InitializationState::Completed);
    // the full 30s connection wait elapsed before moving on
    assert!(outcome.elapsed >= Duration::from_secs(30));
    assert!(!conn.connected.load(std::sync::atomic::Ordering::SeqCst));
    assert!(triad.communication_established());
}
