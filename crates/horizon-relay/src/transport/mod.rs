//! The boundary between the connection engine and a concrete socket.
//!
//! A [`Connector`] performs one handshake and yields a [`TransportLink`]:
//! a shared [`TransportHandle`] for outbound traffic plus a channel of
//! [`TransportEvent`]s. The events channel ending without a
//! [`TransportEvent::Close`] is treated as an abnormal closure (1006).
//!
//! Two connectors ship with the crate:
//!
//! - [`TungsteniteConnector`]: real sockets via `tokio-tungstenite`, with
//!   rustls and HTTP `CONNECT` proxy support
//! - [`MemoryConnector`]: an in-process peer, used by the test suite

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use url::Url;

use crate::config::ProxyConfig;
use crate::error::{NetworkError, Result};
use crate::message::{CloseReason, MessageData};
use crate::tls::TlsConfig;

mod memory;
mod proxy;
mod tungstenite;

pub use memory::{MemoryConnector, MemoryPeer, MemoryServer, PeerEvent};
pub use tungstenite::TungsteniteConnector;

/// Everything a connector needs to open one connection.
#[derive(Clone, Debug)]
pub struct HandshakeRequest {
    /// Target URL, already checked to be `ws://` or `wss://`.
    pub url: Url,
    /// Offered subprotocols.
    pub protocols: Vec<String>,
    /// Extra handshake headers.
    pub headers: Vec<(String, String)>,
    /// TLS settings for `wss://`.
    pub tls: Option<TlsConfig>,
    /// HTTP proxy to tunnel through.
    pub proxy: Option<ProxyConfig>,
    /// Whether per-message compression was requested.
    pub permessage_deflate: bool,
}

/// An outbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
    /// Ping control frame.
    Ping(Bytes),
    /// Pong control frame.
    Pong(Bytes),
}

impl Frame {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) | Frame::Ping(data) | Frame::Pong(data) => data.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<MessageData> for Frame {
    fn from(data: MessageData) -> Self {
        match data {
            MessageData::Text(text) => Frame::Text(text),
            MessageData::Binary(data) => Frame::Binary(data),
        }
    }
}

/// Something that happened on the connection.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// An application message arrived.
    Message(MessageData),
    /// The peer pinged us.
    Ping(Bytes),
    /// The peer answered a ping.
    Pong(Bytes),
    /// The connection closed. No further events follow.
    Close(CloseReason),
    /// A non-fatal transport error.
    Error(NetworkError),
}

/// Outbound half of a live connection.
pub trait TransportHandle: Send + Sync + fmt::Debug {
    /// Queue a frame for sending. Fails once the connection is closing.
    fn send(&self, frame: Frame) -> Result<()>;

    /// Start the closing handshake. Idempotent.
    fn close(&self, reason: CloseReason);

    /// Bytes queued but not yet written to the socket.
    fn buffered_amount(&self) -> usize;

    /// Whether inbound payloads may be consumed as a byte stream.
    fn supports_byte_stream(&self) -> bool {
        true
    }
}

/// A freshly opened connection.
pub struct TransportLink {
    /// Outbound handle, shared with the client for direct sends.
    pub handle: Arc<dyn TransportHandle>,
    /// Inbound events in arrival order.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportLink")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Opens connections.
pub trait Connector: Send + Sync + 'static {
    /// Perform a handshake. The returned future must not borrow `self`.
    fn connect(&self, request: HandshakeRequest) -> BoxFuture<'static, Result<TransportLink>>;
}

impl<C: Connector + ?Sized> Connector for Arc<C> {
    fn connect(&self, request: HandshakeRequest) -> BoxFuture<'static, Result<TransportLink>> {
        (**self).connect(request)
    }
}
