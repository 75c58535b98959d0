//! Heartbeat probing and watchdog tests.

mod common;

use std::time::Duration;

use bytes::Bytes;
use horizon_relay::transport::{Frame, MemoryServer, PeerEvent};
use horizon_relay::{
    ClientConfig, CloseCode, CloseReason, ConnectionState, HeartbeatConfig, ReconnectConfig,
};
use tokio::time::Instant;

use common::{Recorder, connected, quiet_config};

fn probing(interval_ms: u64, timeout_ms: u64) -> ClientConfig {
    quiet_config()
        .heartbeat(HeartbeatConfig::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
        ))
        .reconnect_config(
            ReconnectConfig::new()
                .jitter(false)
                .initial_delay(Duration::from_secs(10)),
        )
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_times_out() {
    let mut server = MemoryServer::new();
    server.set_auto_pong(false);
    let (client, mut peer) = connected(&mut server, probing(50, 30)).await;
    let opened_at = Instant::now();
    let timeouts = Recorder::attach(&client.events().heartbeat_timeout);
    let closed = Recorder::attach(&client.events().closed);
    let reconnecting = Recorder::attach(&client.events().reconnecting);

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(timeouts.times(), vec![opened_at + Duration::from_millis(80)]);
    assert_eq!(closed.values(), vec![CloseReason::heartbeat_timeout()]);
    assert_eq!(closed.times(), timeouts.times());
    assert_eq!(closed.values()[0].code.as_u16(), 4000);
    assert_eq!(reconnecting.count(), 1);
    assert_eq!(client.state(), ConnectionState::Closed);

    assert_eq!(
        peer.recv().await,
        Some(PeerEvent::Frame(Frame::Ping(Bytes::new())))
    );
    assert_eq!(
        peer.recv().await,
        Some(PeerEvent::Close(CloseReason::with_reason(
            CloseCode::HeartbeatTimeout,
            "heartbeat timeout"
        )))
    );
}

#[tokio::test(start_paused = true)]
async fn test_answered_pings_keep_connection() {
    let mut server = MemoryServer::new();
    let (client, mut peer) = connected(&mut server, probing(50, 30)).await;
    let timeouts = Recorder::attach(&client.events().heartbeat_timeout);

    tokio::time::sleep(Duration::from_millis(1_020)).await;

    assert_eq!(timeouts.count(), 0);
    assert!(client.is_connected());

    let mut pings = 0;
    while let Some(PeerEvent::Frame(Frame::Ping(_))) = peer.try_recv() {
        pings += 1;
    }
    assert_eq!(pings, 20);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_trails_last_inbound_traffic() {
    let mut server = MemoryServer::new();
    server.set_auto_pong(false);
    let (client, peer) = connected(&mut server, probing(50, 30)).await;
    let opened_at = Instant::now();
    let timeouts = Recorder::attach(&client.events().heartbeat_timeout);
    let messages = Recorder::attach(&client.events().message_received);

    // The first ping goes out at 50ms; data (not a pong) arrives at 60ms.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(peer.send_text("still here"));

    tokio::time::sleep(Duration::from_millis(140)).await;
    let last_traffic = messages.times()[0];
    assert_eq!(last_traffic, opened_at + Duration::from_millis(60));
    assert_eq!(timeouts.times(), vec![last_traffic + Duration::from_millis(30)]);
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_pong_counts_as_traffic() {
    let mut server = MemoryServer::new();
    server.set_auto_pong(false);
    let (client, peer) = connected(&mut server, probing(50, 30)).await;
    let timeouts = Recorder::attach(&client.events().heartbeat_timeout);

    tokio::time::sleep(Duration::from_millis(70)).await;
    assert!(peer.send_pong());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(timeouts.count(), 0);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_without_reconnect_keeps_probing() {
    let mut server = MemoryServer::new();
    server.set_auto_pong(false);
    let (client, _peer) = connected(&mut server, probing(50, 30).no_reconnect()).await;
    let opened_at = Instant::now();
    let timeouts = Recorder::attach(&client.events().heartbeat_timeout);
    let closed = Recorder::attach(&client.events().closed);

    tokio::time::sleep(Duration::from_millis(170)).await;

    assert_eq!(
        timeouts.times(),
        vec![
            opened_at + Duration::from_millis(80),
            opened_at + Duration::from_millis(160),
        ]
    );
    assert_eq!(closed.count(), 0);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_disabled_heartbeat_sends_nothing() {
    let mut server = MemoryServer::new();
    let (client, mut peer) = connected(&mut server, quiet_config()).await;

    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(peer.try_recv().is_none());
    assert!(client.is_connected());
}
