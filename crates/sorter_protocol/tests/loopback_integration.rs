use chrono::Utc;
use common::domain::{AssignmentReason, ChuteAssignment, EndpointConfig, EndpointMode};
use sorter_protocol::{
    decode_line, event_channel, SorterEndpoint, SorterEvent, TcpClientEndpoint,
    TcpServerEndpoint, WireMessage,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::Receiver;
use tokio::time::Instant;

const WAIT: Duration = Duration::from_secs(3);

fn listen_config() -> EndpointConfig {
    EndpointConfig {
        mode: EndpointMode::Listen,
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    }
}

fn assignment(parcel_id: &str, chute_id: &str) -> ChuteAssignment {
    ChuteAssignment {
        parcel_id: parcel_id.to_string(),
        chute_id: chute_id.to_string(),
        reason: AssignmentReason::Rule,
        rule_id: Some("R2".to_string()),
        barcode: Some("SF001".to_string()),
        assigned_at: Utc::now(),
    }
}

async fn next_event(events: &mut Receiver<SorterEvent>) -> SorterEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for sorter event")
        .expect("event channel closed")
}

async fn expect_connection(events: &mut Receiver<SorterEvent>, expected: bool) {
    match next_event(events).await {
        SorterEvent::ConnectionChanged { connected, .. } => assert_eq!(connected, expected),
        other => panic!("expected ConnectionChanged, got {:?}", other),
    }
}

async fn read_message(reader: &mut BufReader<TcpStream>) -> WireMessage {
    let mut line = String::new();
    let read = tokio::time::timeout(WAIT, reader.read_line(&mut line))
        .await
        .expect("timed out reading line")
        .unwrap();
    assert!(read > 0, "connection closed before a line arrived");
    decode_line(&line).unwrap()
}

#[tokio::test]
async fn test_listen_endpoint_serves_one_connection_at_a_time() {
    let (publisher, mut events) = event_channel(32);
    let endpoint = TcpServerEndpoint::new(listen_config(), publisher);
    endpoint.start().await.unwrap();
    let addr = endpoint.local_addr().unwrap();

    let mut first = TcpStream::connect(addr).await.unwrap();
    expect_connection(&mut events, true).await;
    assert!(endpoint.is_connected());

    // Second connection is closed straight away
    let mut second = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(WAIT, second.read(&mut buf))
        .await
        .expect("rejected connection was not closed");
    assert!(matches!(read, Ok(0) | Err(_)));

    first
        .write_all(b"{\"Type\":\"ParcelDetected\",\"ParcelId\":42,\"ClientId\":\"sorter-a\"}\n")
        .await
        .unwrap();
    match next_event(&mut events).await {
        SorterEvent::ParcelDetected(event) => {
            assert_eq!(event.parcel_id, "42");
            assert_eq!(event.source_id.as_deref(), Some("sorter-a"));
        }
        other => panic!("expected ParcelDetected, got {:?}", other),
    }

    drop(first);
    expect_connection(&mut events, false).await;
    assert!(!endpoint.is_connected());

    // A new connection is accepted once the first is gone
    let third = TcpStream::connect(addr).await.unwrap();
    expect_connection(&mut events, true).await;

    assert!(endpoint.send_chute_assignment(&assignment("42", "CH2")).await);
    let mut reader = BufReader::new(third);
    match read_message(&mut reader).await {
        WireMessage::ChuteAssignment(message) => {
            assert_eq!(message.parcel_id, "42");
            assert_eq!(message.chute_id, "CH2");
            assert_eq!(message.rule_id.as_deref(), Some("R2"));
        }
        other => panic!("expected ChuteAssignment, got {:?}", other),
    }

    endpoint.stop().await.unwrap();
}

#[tokio::test]
async fn test_send_without_connection_returns_false() {
    let (publisher, _events) = event_channel(8);
    let endpoint = TcpServerEndpoint::new(listen_config(), publisher);
    endpoint.start().await.unwrap();

    assert!(!endpoint.send_chute_assignment(&assignment("1", "CH1")).await);

    endpoint.stop().await.unwrap();
    assert!(endpoint.local_addr().is_none());
}

#[tokio::test]
async fn test_malformed_lines_do_not_drop_the_connection() {
    let (publisher, mut events) = event_channel(32);
    let endpoint = TcpServerEndpoint::new(listen_config(), publisher);
    endpoint.start().await.unwrap();

    let mut sorter = TcpStream::connect(endpoint.local_addr().unwrap())
        .await
        .unwrap();
    expect_connection(&mut events, true).await;

    sorter
        .write_all(b"garbage\n{\"Type\":\"Heartbeat\"}\n{\"Type\":\"Mystery\"}\n")
        .await
        .unwrap();
    sorter
        .write_all(b"{\"Type\":\"SortingCompleted\",\"ParcelId\":\"P9\",\"ActualChuteId\":\"CH4\",\"IsSuccess\":true}\n")
        .await
        .unwrap();

    match next_event(&mut events).await {
        SorterEvent::SortingCompleted(event) => {
            assert_eq!(event.parcel_id, "P9");
            assert_eq!(event.actual_chute, "CH4");
            assert!(event.success);
        }
        other => panic!("expected SortingCompleted, got {:?}", other),
    }
    assert!(endpoint.is_connected());

    endpoint.stop().await.unwrap();
}

#[tokio::test]
async fn test_heartbeats_are_sent_when_configured() {
    let (publisher, mut events) = event_channel(32);
    let config = EndpointConfig {
        heartbeat_interval_ms: 50,
        ..listen_config()
    };
    let endpoint = TcpServerEndpoint::new(config, publisher);
    endpoint.start().await.unwrap();

    let sorter = TcpStream::connect(endpoint.local_addr().unwrap())
        .await
        .unwrap();
    expect_connection(&mut events, true).await;

    let mut reader = BufReader::new(sorter);
    assert_eq!(read_message(&mut reader).await, WireMessage::Heartbeat);
    assert_eq!(read_message(&mut reader).await, WireMessage::Heartbeat);

    endpoint.stop().await.unwrap();
}

#[tokio::test]
async fn test_dial_endpoint_reconnects_after_disconnect() {
    let sorter = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = sorter.local_addr().unwrap().port();

    let (publisher, mut events) = event_channel(32);
    let endpoint = TcpClientEndpoint::new(
        EndpointConfig {
            mode: EndpointMode::Dial,
            host: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        },
        publisher,
    );
    endpoint.start().await.unwrap();

    let (stream, _) = tokio::time::timeout(WAIT, sorter.accept())
        .await
        .unwrap()
        .unwrap();
    expect_connection(&mut events, true).await;

    assert!(endpoint.send_chute_assignment(&assignment("7", "CH7")).await);
    let mut reader = BufReader::new(stream);
    assert!(matches!(
        read_message(&mut reader).await,
        WireMessage::ChuteAssignment(_)
    ));

    // Sorter side drops the link; the endpoint dials again on its own
    drop(reader);
    expect_connection(&mut events, false).await;

    let (mut stream, _) = tokio::time::timeout(WAIT, sorter.accept())
        .await
        .expect("endpoint did not reconnect")
        .unwrap();
    expect_connection(&mut events, true).await;

    stream
        .write_all(b"{\"Type\":\"ParcelDetected\",\"ParcelId\":\"8\"}\n")
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        SorterEvent::ParcelDetected(event) if event.parcel_id == "8"
    ));

    endpoint.stop().await.unwrap();
    assert!(!endpoint.is_connected());
}

#[tokio::test]
async fn test_dial_endpoint_keeps_retrying_until_sorter_appears() {
    // Reserve a port, then free it so the first attempts are refused
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let (publisher, mut events) = event_channel(32);
    let endpoint = TcpClientEndpoint::new(
        EndpointConfig {
            mode: EndpointMode::Dial,
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            ..Default::default()
        },
        publisher,
    );
    endpoint.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!endpoint.is_connected());

    let sorter = TcpListener::bind(addr).await.unwrap();
    let _stream = tokio::time::timeout(WAIT, sorter.accept())
        .await
        .expect("endpoint never connected")
        .unwrap();
    expect_connection(&mut events, true).await;

    endpoint.stop().await.unwrap();
}

fn dial_config(port: u16) -> EndpointConfig {
    EndpointConfig {
        mode: EndpointMode::Dial,
        host: "127.0.0.1".to_string(),
        port,
        ..Default::default()
    }
}

/// Accepts every connection and closes it straight away, recording when
/// each one arrived.
async fn accept_and_drop(listener: TcpListener, window: Duration) -> Vec<Instant> {
    let deadline = Instant::now() + window;
    let mut arrivals = Vec::new();
    while let Ok(Ok((stream, _))) = tokio::time::timeout_at(deadline, listener.accept()).await {
        arrivals.push(Instant::now());
        drop(stream);
    }
    arrivals
}

#[tokio::test]
async fn test_dial_endpoint_backs_off_when_sorter_drops_every_connection() {
    let sorter = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = sorter.local_addr().unwrap().port();

    let (publisher, _events) = event_channel(256);
    let endpoint = TcpClientEndpoint::new(dial_config(port), publisher);
    endpoint.start().await.unwrap();

    // Schedule: dial at 0, then after 100ms, 500ms, 1s
    let arrivals = accept_and_drop(sorter, Duration::from_millis(1_200)).await;
    endpoint.stop().await.unwrap();

    assert!(
        (2..=4).contains(&arrivals.len()),
        "expected the backoff schedule to limit dials, got {}",
        arrivals.len()
    );
    let gaps: Vec<Duration> = arrivals.windows(2).map(|pair| pair[1] - pair[0]).collect();
    assert!(gaps[0] >= Duration::from_millis(90), "first gap {:?}", gaps[0]);
    if let Some(second) = gaps.get(1) {
        assert!(*second >= Duration::from_millis(450), "second gap {:?}", second);
    }
}

#[tokio::test]
async fn test_dial_endpoint_restarts_schedule_after_stable_session() {
    let sorter = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = sorter.local_addr().unwrap().port();

    let (publisher, _events) = event_channel(64);
    let endpoint = TcpClientEndpoint::new(dial_config(port), publisher);
    endpoint.start().await.unwrap();

    // Two short sessions push the schedule to 500ms
    for _ in 0..2 {
        let (stream, _) = tokio::time::timeout(WAIT, sorter.accept())
            .await
            .unwrap()
            .unwrap();
        drop(stream);
    }

    // A session that outlives the stability window resets it
    let (stream, _) = tokio::time::timeout(WAIT, sorter.accept())
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    drop(stream);
    let dropped_at = Instant::now();

    let _stream = tokio::time::timeout(WAIT, sorter.accept())
        .await
        .expect("endpoint did not reconnect")
        .unwrap();
    let gap = dropped_at.elapsed();
    assert!(
        gap < Duration::from_millis(300),
        "reconnect after a stable session took {:?}",
        gap
    );

    endpoint.stop().await.unwrap();
}
