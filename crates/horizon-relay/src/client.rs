//! The public relay client handle.

use std::future::Future;
use std::sync::Arc;

use horizon_relay_core::Signal;
use horizon_relay_core::logging::targets;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::backpressure::BackpressureGate;
use crate::broker::{ByteStream, MessageBroker, MessageStream};
use crate::config::{ClientConfig, SendOptions};
use crate::error::{NetworkError, Result};
use crate::manager::{ClientShared, Command, ConnectionManager};
use crate::message::{CloseCode, CloseReason, ConnectionState, Message, MessageData};
use crate::reconnect::ReconnectAttempt;
use crate::stream::{self, StreamAdapter};
use crate::transport::{Connector, Frame, TungsteniteConnector};

/// Notifications published by a [`RelayClient`].
///
/// Slots run on the client's connection task, in the order things happen.
/// Keep them short; hand long work off to another task.
#[derive(Debug, Default)]
pub struct ClientEvents {
    /// A handshake succeeded and the connection is open.
    pub opened: Signal<()>,
    /// A message arrived.
    pub message_received: Signal<Message>,
    /// A live connection closed, for any reason.
    pub closed: Signal<CloseReason>,
    /// Something went wrong. Failed initial handshakes and errors on an
    /// established connection land here.
    pub error: Signal<NetworkError>,
    /// A reconnect attempt was scheduled.
    pub reconnecting: Signal<ReconnectAttempt>,
    /// A reconnect handshake failed. Another attempt follows unless the
    /// attempt cap is reached.
    pub reconnect_failed: Signal<NetworkError>,
    /// The attempt cap was reached; the client will not reconnect again.
    pub reconnect_exhausted: Signal<()>,
    /// A heartbeat ping went unanswered.
    pub heartbeat_timeout: Signal<()>,
    /// The connection state changed.
    pub state_changed: Signal<ConnectionState>,
}

/// A resilient real-time connection to a relay.
///
/// The client reconnects with exponential backoff after unexpected closes,
/// pings the peer while open, and delivers inbound messages
/// both to signal subscribers and to one pull consumer.
///
/// # Example
///
/// ```ignore
/// use horizon_relay::{ClientConfig, RelayClient, SendOptions};
///
/// let client = RelayClient::new(
///     ClientConfig::new("wss://relay.example.com/socket").protocol("relay.v1"),
/// )?;
///
/// client.events().reconnecting.connect(|attempt| {
///     println!("reconnect #{} in {:?}", attempt.attempt, attempt.delay);
/// });
///
/// client.connect().await?;
/// client.send("hello", SendOptions::drained()).await?;
///
/// let mut messages = client.messages()?;
/// while let Some(message) = messages.next().await {
///     println!("{:?}", message.as_text());
/// }
/// ```
pub struct RelayClient {
    config: ClientConfig,
    shared: ClientShared,
    events: Arc<ClientEvents>,
    broker: Arc<MessageBroker>,
    gate: BackpressureGate,
    streams: StreamAdapter,
    commands: mpsc::UnboundedSender<Command>,
    /// Spawned on the first `connect()`.
    manager: Mutex<Option<ConnectionManager>>,
}

impl RelayClient {
    /// Create a client that connects over real sockets.
    ///
    /// Fails with a configuration error if `config` does not validate.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_connector(config, TungsteniteConnector::new())
    }

    /// Create a client that opens connections through `connector`.
    pub fn with_connector(config: ClientConfig, connector: impl Connector) -> Result<Self> {
        config.validate()?;

        let shared = ClientShared::default();
        let events = Arc::new(ClientEvents::default());
        let broker = Arc::new(MessageBroker::new(config.message_buffer));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            config.clone(),
            Arc::new(connector),
            shared.clone(),
            events.clone(),
            broker.clone(),
            command_rx,
        );

        Ok(Self {
            config,
            shared,
            events,
            broker,
            gate: BackpressureGate::default(),
            streams: StreamAdapter::default(),
            commands,
            manager: Mutex::new(Some(manager)),
        })
    }

    /// Create a client and connect it.
    pub async fn open(config: ClientConfig) -> Result<Self> {
        let client = Self::new(config)?;
        client.connect().await?;
        Ok(client)
    }

    /// The client's notification signals.
    pub fn events(&self) -> &ClientEvents {
        &self.events
    }

    /// The configured relay URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether the connection is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Whether a reconnect attempt is scheduled and waiting for its delay.
    pub fn is_reconnecting(&self) -> bool {
        self.shared.lock().reconnecting
    }

    /// Attempts made since the last successful open.
    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.lock().reconnect_attempt
    }

    /// Open the connection.
    ///
    /// Resolves once the connection is open. Resolves immediately if it
    /// already is, joins a handshake that is already running, and cuts a
    /// reconnect wait short. Fails with a state error after
    /// [`close`](Self::close) or once reconnect attempts are exhausted.
    pub async fn connect(&self) -> Result<()> {
        {
            let inner = self.shared.lock();
            if inner.closed_by_owner || inner.terminal {
                return Err(NetworkError::state("connect", inner.state));
            }
            if inner.state == ConnectionState::Open {
                return Ok(());
            }
        }

        if let Some(manager) = self.manager.lock().take() {
            tokio::spawn(manager.run());
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply })
            .map_err(|_| NetworkError::Cancelled)?;
        response.await.map_err(|_| NetworkError::Cancelled)?
    }

    /// Send a message.
    ///
    /// Fails immediately with a state error unless the connection is open.
    /// With [`SendOptions::await_drain`] the call also waits, best effort,
    /// for the outbound buffer to fall below the high-water mark.
    pub async fn send(&self, data: impl Into<MessageData>, options: SendOptions) -> Result<()> {
        options.validate()?;
        let handle = self.shared.open_handle("send")?;
        let frame = Frame::from(data.into());
        self.gate.send(&self.shared, &handle, frame, &options).await
    }

    /// Queue a message without waiting.
    pub fn try_send(&self, data: impl Into<MessageData>) -> Result<()> {
        let handle = self.shared.open_handle("send")?;
        handle.send(Frame::from(data.into()))
    }

    /// Serialize `value` as JSON and send it as a text message.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let handle = self.shared.open_handle("send")?;
        let text = serde_json::to_string(value)?;
        handle.send(Frame::Text(text))
    }

    /// Send every chunk of a byte stream as a binary message.
    ///
    /// Concurrent stream sends are serialized. Returns the number of bytes
    /// sent. A source error ends the send with [`NetworkError::Stream`].
    pub async fn send_stream<S, B, E>(&self, source: S, options: SendOptions) -> Result<u64>
    where
        S: futures_util::Stream<Item = std::result::Result<B, E>>,
        B: Into<bytes::Bytes>,
        E: std::fmt::Display,
    {
        self.streams.send_stream(&self.shared, source, options).await
    }

    /// Read `reader` to its end, sending each chunk as a binary message.
    pub async fn send_reader<R>(&self, reader: R, options: SendOptions) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        self.streams.send_reader(&self.shared, reader, options).await
    }

    /// The pull consumer of inbound messages.
    ///
    /// Only one stream may be alive at a time; a second call fails with a
    /// state error until the first is dropped or cancelled. The stream ends
    /// when the connection closes. On a closed-for-good client the stream is
    /// already over.
    pub fn messages(&self) -> Result<MessageStream> {
        let (state, finished) = {
            let inner = self.shared.lock();
            (inner.state, inner.terminal)
        };
        self.broker.subscribe(state, finished)
    }

    /// Inbound payloads as a byte stream.
    ///
    /// `None` unless the connection is open and the transport offers a
    /// byte view.
    pub fn to_readable(&self) -> Option<ByteStream> {
        let handle = self.shared.open_handle("read bytes").ok()?;
        if !handle.supports_byte_stream() {
            return None;
        }
        Some(self.broker.tap())
    }

    /// Copy inbound payloads into `destination` until the connection closes.
    ///
    /// Fails with [`NetworkError::Stream`] when no byte view is available and
    /// with [`NetworkError::Cancelled`] when the destination stops accepting
    /// data.
    pub async fn pipe_to<W>(&self, destination: W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let bytes = self
            .to_readable()
            .ok_or_else(|| NetworkError::Stream("no byte stream available".into()))?;
        stream::pipe_to(bytes, destination).await
    }

    /// Close the connection for good.
    ///
    /// Reconnection is suppressed from the moment this is called, even if
    /// the returned future is dropped. Awaiting it waits until every timer
    /// has been cleared and the transport has been told to close.
    pub fn close(
        &self,
        code: impl Into<CloseCode>,
        reason: impl Into<String>,
    ) -> impl Future<Output = ()> + Send + 'static {
        let reason = CloseReason::with_reason(code.into(), reason);
        let spawned = {
            let mut inner = self.shared.lock();
            inner.closed_by_owner = true;
            inner.terminal = true;
            self.manager.lock().take().is_none()
        };
        tracing::debug!(target: targets::CLIENT, code = reason.code.as_u16(), "close requested");

        let ack = if spawned {
            let (ack, done) = oneshot::channel();
            self.commands
                .send(Command::Close { reason, ack })
                .ok()
                .map(|_| done)
        } else {
            None
        };

        async move {
            if let Some(done) = ack {
                let _ = done.await;
            }
        }
    }

    /// Close with a normal (1000) code and no reason.
    pub fn disconnect(&self) -> impl Future<Output = ()> + Send + 'static {
        self.close(CloseCode::Normal, "")
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish()
    }
}
