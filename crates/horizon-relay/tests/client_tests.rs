//! Relay client lifecycle and delivery tests against the in-process server.

mod common;

use std::time::Duration;

use bytes::Bytes;
use horizon_relay::transport::{Frame, MemoryServer, PeerEvent};
use horizon_relay::{
    CloseCode, CloseReason, ConnectionState, NetworkError, RelayClient, SendOptions,
};
use serde_json::json;

use common::{Recorder, connected, quiet_config, settle};

#[tokio::test(start_paused = true)]
async fn test_send_before_connect_fails() {
    let server = MemoryServer::new();
    let client = RelayClient::with_connector(quiet_config(), server.connector()).unwrap();

    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(!client.is_connected());

    let err = client.send("hello", SendOptions::new()).await.unwrap_err();
    assert!(err.is_state_error());
    assert!(matches!(
        err,
        NetworkError::State {
            operation: "send",
            state: ConnectionState::Closed
        }
    ));

    assert!(client.try_send("hello").unwrap_err().is_state_error());
    assert!(client.send_json(&json!({ "a": 1 })).unwrap_err().is_state_error());
    assert_eq!(server.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_rejected_at_construction() {
    let server = MemoryServer::new();
    let err = RelayClient::with_connector(
        quiet_config().message_buffer(0),
        server.connector(),
    )
    .unwrap_err();
    assert!(matches!(err, NetworkError::InvalidConfig(_)));

    let err = RelayClient::with_connector(
        horizon_relay::ClientConfig::new("http://relay.test/"),
        server.connector(),
    )
    .unwrap_err();
    assert!(matches!(err, NetworkError::InvalidUrl(_)));
}

#[tokio::test(start_paused = true)]
async fn test_connect_opens_and_emits() {
    let mut server = MemoryServer::new();
    let client = RelayClient::with_connector(quiet_config(), server.connector()).unwrap();
    let opened = Recorder::attach(&client.events().opened);
    let states = Recorder::attach(&client.events().state_changed);

    client.connect().await.unwrap();
    let _peer = server.accept().await.unwrap();

    assert!(client.is_connected());
    assert_eq!(opened.count(), 1);
    assert_eq!(
        states.values(),
        vec![ConnectionState::Connecting, ConnectionState::Open]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_when_open_is_a_no_op() {
    let mut server = MemoryServer::new();
    let (client, _peer) = connected(&mut server, quiet_config()).await;

    client.connect().await.unwrap();
    client.connect().await.unwrap();
    assert_eq!(server.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_one_handshake() {
    let mut server = MemoryServer::new();
    server.set_handshake_delay(Duration::from_millis(50));
    let client = RelayClient::with_connector(quiet_config(), server.connector()).unwrap();

    let (first, second) = tokio::join!(client.connect(), client.connect());
    first.unwrap();
    second.unwrap();

    assert_eq!(server.attempts(), 1);
    assert!(server.accept().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_handshake_carries_protocols_and_headers() {
    let mut server = MemoryServer::new();
    let config = quiet_config()
        .protocol("relay.v1")
        .protocol("relay.v0")
        .header("Authorization", "Bearer token");
    let (_client, peer) = connected(&mut server, config).await;

    let request = peer.request();
    assert_eq!(request.url.host_str(), Some("relay.test"));
    assert_eq!(request.protocols, vec!["relay.v1", "relay.v0"]);
    assert_eq!(
        request.headers,
        vec![("Authorization".to_string(), "Bearer token".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_initial_connect_is_not_retried() {
    let server = MemoryServer::new();
    server.fail_next(NetworkError::Connection("refused".into()));
    let client = RelayClient::with_connector(quiet_config(), server.connector()).unwrap();
    let errors = Recorder::attach(&client.events().error);
    let reconnecting = Recorder::attach(&client.events().reconnecting);

    let err = client.connect().await.unwrap_err();
    assert_eq!(err, NetworkError::Connection("refused".into()));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(errors.values(), vec![err]);
    assert_eq!(reconnecting.count(), 0);
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(server.attempts(), 1);

    // Not terminal: a later connect may still succeed.
    client.connect().await.unwrap();
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_connect_times_out() {
    let server = MemoryServer::new();
    server.set_handshake_delay(Duration::from_secs(30));
    let client = RelayClient::with_connector(
        quiet_config().connect_timeout(Duration::from_secs(2)),
        server.connector(),
    )
    .unwrap();

    let start = tokio::time::Instant::now();
    let err = client.connect().await.unwrap_err();
    assert_eq!(err, NetworkError::Timeout);
    assert_eq!(start.elapsed(), Duration::from_secs(2));
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_messages_arrive_in_order() {
    let mut server = MemoryServer::new();
    let (client, peer) = connected(&mut server, quiet_config()).await;
    let received = Recorder::attach(&client.events().message_received);
    let mut messages = client.messages().unwrap();

    for i in 1..=5 {
        assert!(peer.send_text(format!("m{i}")));
    }

    let mut pulled = Vec::new();
    for _ in 0..5 {
        let message = messages.next().await.unwrap();
        pulled.push(message.as_text().unwrap().to_string());
    }
    assert_eq!(pulled, vec!["m1", "m2", "m3", "m4", "m5"]);

    let pushed: Vec<String> = received
        .values()
        .iter()
        .map(|m| m.as_text().unwrap().to_string())
        .collect();
    assert_eq!(pushed, pulled);
}

#[tokio::test(start_paused = true)]
async fn test_json_round_trip_through_echo() {
    let mut server = MemoryServer::new();
    let (client, mut peer) = connected(&mut server, quiet_config()).await;
    let mut messages = client.messages().unwrap();

    client.send_json(&json!({ "a": 1 })).unwrap();
    let Some(PeerEvent::Frame(Frame::Text(text))) = peer.recv().await else {
        panic!("expected a text frame");
    };
    assert!(peer.send_text(text));

    let message = messages.next().await.unwrap();
    assert!(!message.is_binary());
    let value: serde_json::Value = message.json().unwrap();
    assert_eq!(value, json!({ "a": 1 }));
}

#[tokio::test(start_paused = true)]
async fn test_send_and_try_send_reach_peer() {
    let mut server = MemoryServer::new();
    let (client, mut peer) = connected(&mut server, quiet_config()).await;

    client.send("hello", SendOptions::new()).await.unwrap();
    client.try_send(vec![1u8, 2, 3]).unwrap();

    assert_eq!(
        peer.recv().await,
        Some(PeerEvent::Frame(Frame::Text("hello".into())))
    );
    assert_eq!(
        peer.recv().await,
        Some(PeerEvent::Frame(Frame::Binary(Bytes::from_static(&[1, 2, 3]))))
    );
}

#[tokio::test(start_paused = true)]
async fn test_single_pull_consumer() {
    let mut server = MemoryServer::new();
    let (client, _peer) = connected(&mut server, quiet_config()).await;

    let first = client.messages().unwrap();
    let err = client.messages().unwrap_err();
    assert!(err.is_state_error());

    drop(first);
    let mut second = client.messages().unwrap();
    second.cancel();
    assert!(second.is_cancelled());
    assert!(second.next().await.is_none());

    // A cancelled stream frees the slot too.
    assert!(client.messages().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_pull_overflow_reports_backpressure() {
    let mut server = MemoryServer::new();
    let (client, peer) = connected(&mut server, quiet_config().message_buffer(2)).await;
    let received = Recorder::attach(&client.events().message_received);
    let errors = Recorder::attach(&client.events().error);
    let mut messages = client.messages().unwrap();

    for text in ["a", "b", "c"] {
        peer.send_text(text);
    }
    settle().await;

    assert_eq!(received.count(), 3);
    let errors = errors.values();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], NetworkError::Backpressure(_)));

    assert_eq!(messages.next().await.unwrap().as_text(), Some("a"));
    assert_eq!(messages.next().await.unwrap().as_text(), Some("b"));
}

#[tokio::test(start_paused = true)]
async fn test_owner_close_ends_everything() {
    let mut server = MemoryServer::new();
    let (client, mut peer) = connected(&mut server, quiet_config()).await;
    let closed = Recorder::attach(&client.events().closed);
    let reconnecting = Recorder::attach(&client.events().reconnecting);
    let mut messages = client.messages().unwrap();

    client.close(CloseCode::Normal, "bye").await;

    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(messages.next().await.is_none());
    assert_eq!(
        peer.recv().await,
        Some(PeerEvent::Close(CloseReason::with_reason(CloseCode::Normal, "bye")))
    );
    assert_eq!(
        closed.values(),
        vec![CloseReason::with_reason(CloseCode::Normal, "bye")]
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(reconnecting.count(), 0);
    assert_eq!(server.attempts(), 1);

    assert!(client.connect().await.unwrap_err().is_state_error());
    assert!(client.try_send("late").unwrap_err().is_state_error());

    // Closing again is harmless.
    client.disconnect().await;
    assert_eq!(closed.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_before_connect() {
    let server = MemoryServer::new();
    let client = RelayClient::with_connector(quiet_config(), server.connector()).unwrap();
    let closed = Recorder::attach(&client.events().closed);

    client.disconnect().await;

    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(closed.count(), 0);
    assert!(client.connect().await.unwrap_err().is_state_error());
    assert_eq!(server.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_during_handshake_cancels_connect() {
    let mut server = MemoryServer::new();
    server.set_handshake_delay(Duration::from_millis(100));
    let client = RelayClient::with_connector(quiet_config(), server.connector()).unwrap();

    let (result, ()) = tokio::join!(client.connect(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.disconnect().await;
    });

    assert_eq!(result.unwrap_err(), NetworkError::Cancelled);
    assert_eq!(client.state(), ConnectionState::Closed);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.try_accept().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_peer_close_reports_code() {
    let mut server = MemoryServer::new();
    let (client, peer) = connected(&mut server, quiet_config().no_reconnect()).await;
    let closed = Recorder::attach(&client.events().closed);
    let mut messages = client.messages().unwrap();

    peer.close(CloseCode::Away, "restarting");
    assert!(messages.next().await.is_none());

    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(
        closed.values(),
        vec![CloseReason::with_reason(CloseCode::Away, "restarting")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_lost_connection_is_abnormal() {
    let mut server = MemoryServer::new();
    let (client, peer) = connected(&mut server, quiet_config().no_reconnect()).await;
    let closed = Recorder::attach(&client.events().closed);

    peer.drop_connection();
    settle().await;

    assert_eq!(closed.values(), vec![CloseReason::abnormal()]);
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_is_reported_without_closing() {
    let mut server = MemoryServer::new();
    let (client, peer) = connected(&mut server, quiet_config()).await;
    let errors = Recorder::attach(&client.events().error);

    peer.send_error(NetworkError::WebSocket("bad frame".into()));
    settle().await;

    assert_eq!(errors.values(), vec![NetworkError::WebSocket("bad frame".into())]);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_client_closes_connection() {
    let mut server = MemoryServer::new();
    let (client, mut peer) = connected(&mut server, quiet_config()).await;

    drop(client);

    assert_eq!(
        peer.recv().await,
        Some(PeerEvent::Close(CloseReason::new(CloseCode::Away)))
    );
}

#[tokio::test(start_paused = true)]
async fn test_readable_view() {
    let mut server = MemoryServer::new();
    let (client, peer) = connected(&mut server, quiet_config()).await;

    let mut readable = client.to_readable().unwrap();
    peer.send_text("ab");
    peer.send_binary(vec![1u8, 2]);

    assert_eq!(readable.next().await, Some(Bytes::from_static(b"ab")));
    assert_eq!(readable.next().await, Some(Bytes::from_static(&[1, 2])));

    peer.close(CloseCode::Normal, "");
    assert_eq!(readable.next().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_readable_unavailable() {
    let mut server = MemoryServer::new();
    server.set_byte_stream(false);
    let (client, _peer) = connected(&mut server, quiet_config()).await;

    assert!(client.to_readable().is_none());
    let err = client.pipe_to(Vec::<u8>::new()).await.unwrap_err();
    assert!(matches!(err, NetworkError::Stream(_)));
}

#[tokio::test(start_paused = true)]
async fn test_readable_requires_open_connection() {
    let server = MemoryServer::new();
    let client = RelayClient::with_connector(quiet_config(), server.connector()).unwrap();
    assert!(client.to_readable().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_pipe_to_copies_until_close() {
    let mut server = MemoryServer::new();
    let (client, peer) = connected(&mut server, quiet_config().no_reconnect()).await;

    let mut sink: Vec<u8> = Vec::new();
    let (copied, ()) = tokio::join!(client.pipe_to(&mut sink), async move {
        peer.send_text("ab");
        peer.send_binary(vec![1u8, 2]);
        peer.close(CloseCode::Normal, "");
    });

    assert_eq!(copied.unwrap(), 4);
    assert_eq!(sink, b"ab\x01\x02");
}
