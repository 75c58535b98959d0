//! Real sockets through `tokio-tungstenite`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use horizon_relay_core::logging::targets;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as TungsteniteCloseCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{Connector as TlsConnector, MaybeTlsStream, WebSocketStream};

use super::proxy::connect_via_proxy;
use super::{Connector, Frame, HandshakeRequest, TransportEvent, TransportHandle, TransportLink};
use crate::error::{NetworkError, Result};
use crate::message::{CloseCode, CloseReason, MessageData};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long the reader may wait for the peer's close reply once the writer
/// is done before the socket is torn down.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// [`Connector`] backed by `tokio-tungstenite` and rustls.
#[derive(Clone, Debug, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

impl Connector for TungsteniteConnector {
    fn connect(&self, request: HandshakeRequest) -> BoxFuture<'static, Result<TransportLink>> {
        Box::pin(async move {
            let stream = open_stream(&request).await?;
            Ok(spawn_link(stream, CLOSE_GRACE))
        })
    }
}

/// Build the upgrade request with subprotocols and custom headers.
fn build_request(request: &HandshakeRequest) -> Result<Request> {
    let mut http_request = request.url.as_str().into_client_request()?;

    let headers = http_request.headers_mut();
    for (name, value) in &request.headers {
        let header_name = http::header::HeaderName::try_from(name.as_str())?;
        let header_value = http::header::HeaderValue::try_from(value.as_str())?;
        headers.append(header_name, header_value);
    }
    if !request.protocols.is_empty() {
        let offered = http::header::HeaderValue::try_from(request.protocols.join(", "))?;
        headers.insert(http::header::SEC_WEBSOCKET_PROTOCOL, offered);
    }

    Ok(http_request)
}

async fn open_stream(request: &HandshakeRequest) -> Result<WsStream> {
    let http_request = build_request(request)?;

    if request.permessage_deflate {
        tracing::debug!(
            target: targets::TRANSPORT,
            "permessage-deflate requested but not available; continuing uncompressed"
        );
    }

    let connector = match &request.tls {
        Some(tls) if request.url.scheme() == "wss" => {
            Some(TlsConnector::Rustls(tls.build_rustls_config()?))
        }
        _ => None,
    };

    tracing::debug!(target: targets::TRANSPORT, url = %request.url, "opening websocket");

    let (stream, _response) = match &request.proxy {
        Some(proxy) => {
            let host = request
                .url
                .host_str()
                .ok_or_else(|| NetworkError::InvalidUrl("URL has no host".into()))?;
            let port = request
                .url
                .port_or_known_default()
                .ok_or_else(|| NetworkError::InvalidUrl("URL has no port".into()))?;
            let tunnel = connect_via_proxy(proxy, host, port).await?;
            tokio_tungstenite::client_async_tls_with_config(http_request, tunnel, None, connector)
                .await?
        }
        None => {
            tokio_tungstenite::connect_async_tls_with_config(http_request, None, false, connector)
                .await?
        }
    };

    Ok(stream)
}

enum Outbound {
    Frame(Frame),
    Close(CloseReason),
}

#[derive(Debug)]
struct TungsteniteHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    buffered: Arc<AtomicUsize>,
    closing: AtomicBool,
}

impl TransportHandle for TungsteniteHandle {
    fn send(&self, frame: Frame) -> Result<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(NetworkError::WebSocket("connection is closing".into()));
        }
        let len = frame.len();
        self.buffered.fetch_add(len, Ordering::SeqCst);
        self.outbound.send(Outbound::Frame(frame)).map_err(|_| {
            self.buffered.fetch_sub(len, Ordering::SeqCst);
            NetworkError::Connection("connection closed".into())
        })
    }

    fn close(&self, reason: CloseReason) {
        if !self.closing.swap(true, Ordering::SeqCst) {
            let _ = self.outbound.send(Outbound::Close(reason));
        }
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }
}

/// Split the socket into a writer task fed by the handle and a reader task
/// feeding the events channel. The writer owns the reader: once it stops
/// (close sent, write error or handle dropped) the reader gets `close_grace`
/// to see the peer's reply and is aborted after that, so a silent peer never
/// pins the socket.
fn spawn_link(stream: WsStream, close_grace: Duration) -> TransportLink {
    let (mut sink, mut source) = stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let buffered = Arc::new(AtomicUsize::new(0));
    let writer_buffered = buffered.clone();
    let writer_events = event_tx.clone();

    let reader = tokio::spawn(async move {
        let close = loop {
            let event = match source.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    TransportEvent::Message(MessageData::Text(text.as_str().to_owned()))
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    TransportEvent::Message(MessageData::Binary(data))
                }
                // tungstenite queues the pong reply itself.
                Some(Ok(WsMessage::Ping(payload))) => TransportEvent::Ping(payload),
                Some(Ok(WsMessage::Pong(payload))) => TransportEvent::Pong(payload),
                Some(Ok(WsMessage::Close(frame))) => {
                    break frame
                        .map(|f| {
                            CloseReason::with_reason(
                                CloseCode::from_u16(u16::from(f.code)),
                                f.reason.as_str(),
                            )
                        })
                        .unwrap_or_else(|| CloseReason::new(CloseCode::NoStatus));
                }
                Some(Ok(WsMessage::Frame(_))) => continue,
                Some(Err(e)) => {
                    let _ = event_tx.send(TransportEvent::Error(e.into()));
                    break CloseReason::abnormal();
                }
                None => break CloseReason::abnormal(),
            };
            if event_tx.send(event).is_err() {
                return;
            }
        };
        let _ = event_tx.send(TransportEvent::Close(close));
    });

    tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            match outbound {
                Outbound::Frame(frame) => {
                    let len = frame.len();
                    let result = sink.send(to_ws_message(frame)).await;
                    writer_buffered.fetch_sub(len, Ordering::SeqCst);
                    if let Err(e) = result {
                        let _ = writer_events.send(TransportEvent::Error(e.into()));
                        break;
                    }
                    tracing::trace!(target: targets::TRANSPORT, len, "frame written");
                }
                Outbound::Close(reason) => {
                    let frame = CloseFrame {
                        code: TungsteniteCloseCode::from(reason.code.as_u16()),
                        reason: reason.reason.into(),
                    };
                    let _ = sink.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
            }
        }
        drop(writer_events);
        let abort = reader.abort_handle();
        if tokio::time::timeout(close_grace, reader).await.is_err() {
            abort.abort();
            tracing::debug!(
                target: targets::TRANSPORT,
                ?close_grace,
                "peer did not finish the close handshake; socket dropped"
            );
        }
    });

    TransportLink {
        handle: Arc::new(TungsteniteHandle {
            outbound: outbound_tx,
            buffered,
            closing: AtomicBool::new(false),
        }),
        events: event_rx,
    }
}

fn to_ws_message(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text.into()),
        Frame::Binary(data) => WsMessage::Binary(data),
        Frame::Ping(payload) => WsMessage::Ping(payload),
        Frame::Pong(payload) => WsMessage::Pong(payload),
    }
}
