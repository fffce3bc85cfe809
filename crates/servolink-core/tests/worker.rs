use pretty_assertions::assert_eq;
use servolink_core::config::LinkConfig;
use servolink_core::protocol::{
    ConnectError, ConnectionManager, ConnectionState, Delivery, LinkError, LinkHandle, LinkWorker,
    SendError, SendPolicy, SimulatedBackend, ValidationError,
};
use std::time::Duration;

fn spawn(policy: SendPolicy) -> (SimulatedBackend, LinkHandle) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let sim = SimulatedBackend::with_ports(["COM3"]);
    let config = LinkConfig {
        send_policy: policy,
        ..LinkConfig::default()
    };
    let manager = ConnectionManager::new(config, sim.clone());
    let handle = LinkWorker::spawn(manager).expect("spawn worker");
    (sim, handle)
}

#[tokio::test]
async fn test_worker_scenario() {
    let (sim, link) = spawn(SendPolicy::SendAll);

    assert_eq!(link.list_ports().await.unwrap().len(), 1);
    assert_eq!(
        link.send("A", 90, 5).await,
        Err(LinkError::Send(SendError::NotConnected))
    );

    link.connect("COM3").await.unwrap();
    assert_eq!(link.send("A", 90, 5).await, Ok(Delivery::Written));
    assert!(matches!(
        link.send("B", 200, 5).await,
        Err(LinkError::Send(SendError::Validation(_)))
    ));
    link.disconnect().await.unwrap();
    assert_eq!(
        link.send("A", 0, 1).await,
        Err(LinkError::Send(SendError::NotConnected))
    );

    assert_eq!(sim.wire(), b"A:90:5\n".to_vec());
    link.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_send_all_transmits_every_command_in_order() {
    let (sim, link) = spawn(SendPolicy::SendAll);
    link.connect("COM3").await.unwrap();

    for angle in 0..=180 {
        link.try_send("A", angle, 5).unwrap();
    }
    // A waited send after the burst proves the queue has drained
    assert_eq!(link.send("B", 1, 1).await, Ok(Delivery::Written));

    let angles: Vec<i32> = sim
        .lines()
        .into_iter()
        .flatten()
        .filter(|c| c.channel_id() == "A")
        .map(|c| c.angle())
        .collect();
    assert_eq!(angles, (0..=180).collect::<Vec<_>>());
    link.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_latest_wins_coalesces_bursts() {
    let (sim, link) = spawn(SendPolicy::LatestWins);
    link.connect("COM3").await.unwrap();
    // Slow the wire so the slider burst piles up behind the first write
    sim.write_delay(Some(Duration::from_millis(20)));

    for angle in 0..=180 {
        link.try_send("A", angle, 5).unwrap();
    }
    assert_eq!(link.send("A", 42, 5).await, Ok(Delivery::Written));

    let lines: Vec<_> = sim.lines().into_iter().flatten().collect();
    assert!(lines.len() < 182, "expected coalescing, got {} lines", lines.len());
    assert_eq!(lines.last().map(|c| c.angle()), Some(42));

    // Whatever was written still goes out in invocation order
    let angles: Vec<i32> = lines.iter().map(|c| c.angle()).collect();
    let mut sorted = angles.clone();
    sorted[..angles.len() - 1].sort_unstable();
    assert_eq!(angles, sorted);
    link.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_current_state_is_fresh_after_each_reply() {
    let (_sim, link) = spawn(SendPolicy::SendAll);
    let connected = ConnectionState::Connected {
        port: "COM3".to_string(),
    };

    for _ in 0..500 {
        link.connect("COM3").await.unwrap();
        assert_eq!(link.current_state(), connected);
        link.disconnect().await.unwrap();
        assert_eq!(link.current_state(), ConnectionState::Disconnected);
    }

    assert!(link.connect("BADPORT").await.is_err());
    assert!(matches!(link.current_state(), ConnectionState::Failed { .. }));
    link.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_latest_wins_reports_not_connected_after_write_fault() {
    let (sim, link) = spawn(SendPolicy::LatestWins);
    link.connect("COM3").await.unwrap();
    sim.write_delay(Some(Duration::from_millis(50)));
    sim.fail_writes(true);

    // Both A sends queue up behind the failing B write
    link.try_send("B", 90, 5).unwrap();
    let (first, second) = tokio::join!(link.send("A", 10, 5), link.send("A", 20, 5));

    assert_eq!(first, Err(LinkError::Send(SendError::NotConnected)));
    assert_eq!(second, Err(LinkError::Send(SendError::NotConnected)));
    assert!(matches!(link.current_state(), ConnectionState::Failed { .. }));
    assert!(sim.wire().is_empty());
    link.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_latest_wins_rejects_unconfigured_channel() {
    let (sim, link) = spawn(SendPolicy::LatestWins);
    link.connect("COM3").await.unwrap();
    sim.write_delay(Some(Duration::from_millis(20)));

    link.try_send("A", 1, 5).unwrap();
    let (first, second) = tokio::join!(link.send("E", 10, 5), link.send("E", 20, 5));

    let rejected: Result<Delivery, LinkError> = Err(LinkError::Send(SendError::Validation(
        ValidationError::InvalidChannelId("E".to_string()),
    )));
    assert_eq!(first, rejected);
    assert_eq!(second, rejected);
    assert_eq!(sim.wire(), b"A:1:5\n".to_vec());
    link.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_state_watch_follows_transitions() {
    let (sim, link) = spawn(SendPolicy::SendAll);
    let mut state = link.subscribe();
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);

    link.connect("COM3").await.unwrap();
    state.changed().await.unwrap();
    assert_eq!(state.borrow_and_update().port(), Some("COM3"));

    sim.fail_writes(true);
    assert!(matches!(
        link.send("A", 90, 5).await,
        Err(LinkError::Send(SendError::WriteFailed(_)))
    ));
    state.changed().await.unwrap();
    assert!(matches!(
        *state.borrow_and_update(),
        ConnectionState::Failed { .. }
    ));
    assert!(matches!(link.current_state(), ConnectionState::Failed { .. }));

    link.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_through_worker() {
    let (_sim, link) = spawn(SendPolicy::SendAll);
    let err = link.connect("BADPORT").await.unwrap_err();
    assert!(matches!(
        err,
        LinkError::Connect(ConnectError::PortUnavailable { .. })
    ));
    link.connect("COM3").await.unwrap();
    link.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_operations_time_out_instead_of_hanging() {
    let sim = SimulatedBackend::with_ports(["COM3"]);
    let config = LinkConfig {
        op_timeout_ms: 100,
        ..LinkConfig::default()
    };
    let link = LinkWorker::spawn(ConnectionManager::new(config, sim.clone())).unwrap();
    link.connect("COM3").await.unwrap();

    sim.write_delay(Some(Duration::from_millis(500)));
    assert_eq!(
        link.send("A", 90, 5).await,
        Err(LinkError::Timeout(Duration::from_millis(100)))
    );

    // The queued write still lands once the wire frees up
    sim.write_delay(None);
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(sim.wire(), b"A:90:5\n".to_vec());
    link.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_releases_port_and_stops_worker() {
    let (sim, link) = spawn(SendPolicy::SendAll);
    link.connect("COM3").await.unwrap();
    link.shutdown().await.unwrap();

    assert_eq!(sim.opens(), sim.closes());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(link.send("A", 90, 5).await, Err(LinkError::WorkerStopped));
    assert_eq!(link.try_send("A", 90, 5), Err(LinkError::WorkerStopped));
}

#[tokio::test]
async fn test_dropping_handles_releases_port() {
    let (sim, link) = spawn(SendPolicy::SendAll);
    link.connect("COM3").await.unwrap();
    drop(link);

    for _ in 0..50 {
        if sim.opens() == sim.closes() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(sim.opens(), sim.closes());
}
