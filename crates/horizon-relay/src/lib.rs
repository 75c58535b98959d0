//! Resilient real-time WebSocket client for Horizon Relay.
//!
//! [`RelayClient`] keeps one long-lived connection alive for the layers
//! above it:
//!
//! - **Reconnection** with exponential backoff, jitter and an optional
//!   attempt cap ([`ReconnectConfig`])
//! - **Heartbeats**: periodic pings with a watchdog that forces a reconnect
//!   when the peer goes silent ([`HeartbeatConfig`])
//! - **Dual delivery**: every inbound [`Message`] reaches the
//!   `message_received` signal and a single pull consumer
//!   ([`MessageStream`])
//! - **Backpressure**: optional drain waits on send ([`SendOptions`])
//! - **Byte streams**: send from any `Stream` or `AsyncRead`, read inbound
//!   payloads as a [`ByteStream`] or pipe them into an `AsyncWrite`
//!
//! Frame encoding, TLS and proxy tunnelling are handled by the
//! [`transport`] layer.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use horizon_relay::{ClientConfig, HeartbeatConfig, ReconnectConfig, RelayClient};
//!
//! let config = ClientConfig::new("wss://relay.example.com/socket")
//!     .header("Authorization", "Bearer token")
//!     .heartbeat(HeartbeatConfig::new(Duration::from_secs(15), Duration::from_secs(5)))
//!     .reconnect_config(ReconnectConfig::new().max_attempts(20));
//!
//! let client = RelayClient::open(config).await?;
//! client.events().closed.connect(|reason| {
//!     println!("closed with {}", reason.code.as_u16());
//! });
//! client.send_json(&serde_json::json!({ "op": "subscribe", "topic": "prices" }))?;
//! ```

mod backpressure;
mod broker;
mod client;
mod config;
mod error;
mod heartbeat;
mod manager;
mod message;
mod reconnect;
mod stream;
pub mod tls;
pub mod transport;

pub use backpressure::DRAIN_POLL_INTERVAL;
pub use broker::{ByteStream, MessageStream};
pub use client::{ClientEvents, RelayClient};
pub use config::{
    ClientConfig, DEFAULT_CHUNK_SIZE, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HIGH_WATER_MARK,
    DEFAULT_MESSAGE_BUFFER, HeartbeatConfig, ProxyConfig, SendOptions,
};
pub use error::{NetworkError, Result};
pub use message::{CloseCode, CloseReason, ConnectionState, Message, MessageData};
pub use reconnect::{JITTER_FRACTION, ReconnectAttempt, ReconnectConfig, apply_jitter};
pub use tls::{AlpnProtocol, Certificate, Identity, TlsConfig, TlsVersion};

/// Re-exports of the core primitives the client is built on.
pub use horizon_relay_core::{ConnectionId, Signal};
