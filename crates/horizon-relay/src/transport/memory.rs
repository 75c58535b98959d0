//! In-process transport.
//!
//! [`MemoryServer`] plays the remote side of a relay without any sockets.
//! Every successful handshake through its [`MemoryConnector`] produces a
//! [`MemoryPeer`] that the server hands out from [`MemoryServer::accept`].
//! The peer sees every frame the client sends and can push messages,
//! pings, pongs and closes back.
//!
//! ```
//! use horizon_relay::transport::{Frame, MemoryServer, PeerEvent};
//! use horizon_relay::{ClientConfig, RelayClient};
//!
//! # async fn demo() -> horizon_relay::Result<()> {
//! let mut server = MemoryServer::new();
//! let client = RelayClient::with_connector(
//!     ClientConfig::new("ws://relay.test/socket"),
//!     server.connector(),
//! )?;
//! client.connect().await?;
//!
//! let mut peer = server.accept().await.expect("peer");
//! client.try_send("hello")?;
//! assert_eq!(peer.recv().await, Some(PeerEvent::Frame(Frame::Text("hello".into()))));
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Connector, Frame, HandshakeRequest, TransportEvent, TransportHandle, TransportLink};
use crate::error::{NetworkError, Result};
use crate::message::{CloseCode, CloseReason, MessageData};

/// What the peer observes from the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    /// A frame the client sent.
    Frame(Frame),
    /// The client started the closing handshake.
    Close(CloseReason),
}

#[derive(Debug)]
struct ServerState {
    scripted_failures: VecDeque<NetworkError>,
    refuse: bool,
    byte_stream: bool,
    auto_pong: bool,
    handshake_delay: Duration,
    last_request: Option<HandshakeRequest>,
}

#[derive(Debug)]
struct ServerShared {
    state: Mutex<ServerState>,
    attempts: AtomicUsize,
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
}

/// The remote side of in-process connections.
#[derive(Debug)]
pub struct MemoryServer {
    shared: Arc<ServerShared>,
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    /// Create a server that accepts every handshake.
    pub fn new() -> Self {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(ServerShared {
                state: Mutex::new(ServerState {
                    scripted_failures: VecDeque::new(),
                    refuse: false,
                    byte_stream: true,
                    auto_pong: true,
                    handshake_delay: Duration::ZERO,
                    last_request: None,
                }),
                attempts: AtomicUsize::new(0),
                accept_tx,
            }),
            accept_rx,
        }
    }

    /// A connector that dials this server.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            shared: self.shared.clone(),
        }
    }

    /// Wait for the next accepted connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Take an accepted connection if one is waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }

    /// Fail the next handshake with `err`. Calls queue up.
    pub fn fail_next(&self, err: NetworkError) {
        self.shared.state.lock().scripted_failures.push_back(err);
    }

    /// Refuse every handshake until turned off again.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.state.lock().refuse = refuse;
    }

    /// Delay every handshake by `delay`.
    pub fn set_handshake_delay(&self, delay: Duration) {
        self.shared.state.lock().handshake_delay = delay;
    }

    /// Whether new connections advertise a byte-stream view.
    pub fn set_byte_stream(&self, supported: bool) {
        self.shared.state.lock().byte_stream = supported;
    }

    /// Whether new connections answer pings by themselves.
    pub fn set_auto_pong(&self, enabled: bool) {
        self.shared.state.lock().auto_pong = enabled;
    }

    /// Number of handshakes attempted so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// The most recent handshake request.
    pub fn last_request(&self) -> Option<HandshakeRequest> {
        self.shared.state.lock().last_request.clone()
    }
}

/// [`Connector`] that dials a [`MemoryServer`].
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    shared: Arc<ServerShared>,
}

impl Connector for MemoryConnector {
    fn connect(&self, request: HandshakeRequest) -> BoxFuture<'static, Result<TransportLink>> {
        let shared = self.shared.clone();
        Box::pin(async move {
            shared.attempts.fetch_add(1, Ordering::SeqCst);
            let (delay, failure, byte_stream, auto_pong) = {
                let mut state = shared.state.lock();
                state.last_request = Some(request.clone());
                let failure = match state.scripted_failures.pop_front() {
                    Some(err) => Some(err),
                    None if state.refuse => {
                        Some(NetworkError::Connection("connection refused".into()))
                    }
                    None => None,
                };
                (
                    state.handshake_delay,
                    failure,
                    state.byte_stream,
                    state.auto_pong,
                )
            };

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = failure {
                return Err(err);
            }

            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let (frame_tx, frame_rx) = mpsc::unbounded_channel();
            let buffered = Arc::new(AtomicUsize::new(0));

            let handle = Arc::new(MemoryHandle {
                frames: frame_tx,
                events: event_tx.downgrade(),
                buffered: buffered.clone(),
                closed: AtomicBool::new(false),
                byte_stream,
                auto_pong,
            });
            let peer = MemoryPeer {
                request,
                events: event_tx,
                frames: frame_rx,
                buffered,
            };
            shared
                .accept_tx
                .send(peer)
                .map_err(|_| NetworkError::Connection("memory server is gone".into()))?;

            Ok(TransportLink {
                handle,
                events: event_rx,
            })
        })
    }
}

#[derive(Debug)]
struct MemoryHandle {
    frames: mpsc::UnboundedSender<PeerEvent>,
    events: mpsc::WeakUnboundedSender<TransportEvent>,
    buffered: Arc<AtomicUsize>,
    closed: AtomicBool,
    byte_stream: bool,
    auto_pong: bool,
}

impl TransportHandle for MemoryHandle {
    fn send(&self, frame: Frame) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetworkError::WebSocket("connection is closing".into()));
        }
        let ping = match &frame {
            Frame::Ping(payload) if self.auto_pong => Some(payload.clone()),
            _ => None,
        };
        let len = frame.len();
        self.buffered.fetch_add(len, Ordering::SeqCst);
        if self.frames.send(PeerEvent::Frame(frame)).is_err() {
            self.buffered.fetch_sub(len, Ordering::SeqCst);
            return Err(NetworkError::Connection("peer disconnected".into()));
        }
        if let Some(payload) = ping
            && let Some(events) = self.events.upgrade()
        {
            let _ = events.send(TransportEvent::Pong(payload));
        }
        Ok(())
    }

    fn close(&self, reason: CloseReason) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.frames.send(PeerEvent::Close(reason));
        }
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn supports_byte_stream(&self) -> bool {
        self.byte_stream
    }
}

/// The server's end of one in-process connection.
///
/// Dropping the peer without calling [`close`](Self::close) looks like a
/// lost connection to the client (1006).
#[derive(Debug)]
pub struct MemoryPeer {
    request: HandshakeRequest,
    events: mpsc::UnboundedSender<TransportEvent>,
    frames: mpsc::UnboundedReceiver<PeerEvent>,
    buffered: Arc<AtomicUsize>,
}

impl MemoryPeer {
    /// The handshake request that opened this connection.
    pub fn request(&self) -> &HandshakeRequest {
        &self.request
    }

    /// Next frame or close from the client. `None` once the client side is gone.
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        let event = self.frames.recv().await?;
        self.mark_received(&event);
        Some(event)
    }

    /// Like [`recv`](Self::recv) but does not wait.
    pub fn try_recv(&mut self) -> Option<PeerEvent> {
        let event = self.frames.try_recv().ok()?;
        self.mark_received(&event);
        Some(event)
    }

    fn mark_received(&self, event: &PeerEvent) {
        if let PeerEvent::Frame(frame) = event {
            self.buffered.fetch_sub(frame.len(), Ordering::SeqCst);
        }
    }

    /// Deliver a text message. Returns `false` if the client side is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(MessageData::Text(text.into())))
    }

    /// Deliver a binary message. Returns `false` if the client side is gone.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.emit(TransportEvent::Message(MessageData::Binary(data.into())))
    }

    /// Ping the client.
    pub fn send_ping(&self) -> bool {
        self.emit(TransportEvent::Ping(Bytes::new()))
    }

    /// Send an unsolicited pong.
    pub fn send_pong(&self) -> bool {
        self.emit(TransportEvent::Pong(Bytes::new()))
    }

    /// Report a non-fatal transport error to the client.
    pub fn send_error(&self, err: NetworkError) -> bool {
        self.emit(TransportEvent::Error(err))
    }

    /// Close the connection from the server side.
    pub fn close(self, code: impl Into<CloseCode>, reason: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Close(CloseReason::with_reason(
            code.into(),
            reason,
        )));
    }

    /// Vanish without a close frame.
    pub fn drop_connection(self) {}

    fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }
}
