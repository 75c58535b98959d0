//! The connection lifecycle actor.
//!
//! A single task owns the live transport link, the reconnect timer and the
//! heartbeat monitor. Owner commands, transport events and timer expiries
//! are all handled one at a time from its `select!` loop, so none of the
//! fields below need locking. The public handle only sees [`ClientShared`],
//! a small snapshot the actor keeps up to date.
//!
//! ```text
//! Closed ──connect──► Connecting ──ok──► Open ──owner close──► Closing ──► Closed (terminal)
//!   ▲                    │  ▲              │
//!   │                 failed│              │ transport closed / heartbeat timeout
//!   │                    ▼  │              ▼
//!   └──────────────── reconnect wait ◄── Closed ──► exhausted (terminal)
//! ```

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use horizon_relay_core::logging::targets;
use horizon_relay_core::Timer;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};

use crate::broker::MessageBroker;
use crate::client::ClientEvents;
use crate::config::ClientConfig;
use crate::error::{NetworkError, Result};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatTick};
use crate::message::{CloseCode, CloseReason, ConnectionState, Message};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy};
use crate::transport::{Connector, Frame, TransportEvent, TransportHandle, TransportLink};

/// What the handle may observe about the connection.
#[derive(Debug, Default)]
pub(crate) struct ClientInner {
    pub state: ConnectionState,
    pub transport: Option<Arc<dyn TransportHandle>>,
    pub closed_by_owner: bool,
    pub terminal: bool,
    pub reconnecting: bool,
    pub reconnect_attempt: u32,
}

/// Shared view of [`ClientInner`].
#[derive(Clone, Debug, Default)]
pub(crate) struct ClientShared(Arc<Mutex<ClientInner>>);

impl ClientShared {
    pub fn lock(&self) -> MutexGuard<'_, ClientInner> {
        self.0.lock()
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// The live transport handle, or a state error naming `operation`.
    pub fn open_handle(&self, operation: &'static str) -> Result<Arc<dyn TransportHandle>> {
        let inner = self.lock();
        match (&inner.transport, inner.state) {
            (Some(handle), ConnectionState::Open) => Ok(handle.clone()),
            (_, state) => Err(NetworkError::state(operation, state)),
        }
    }

    /// Whether `handle` is still the live, open link.
    pub fn is_current(&self, handle: &Arc<dyn TransportHandle>) -> bool {
        let inner = self.lock();
        inner.state == ConnectionState::Open
            && inner
                .transport
                .as_ref()
                .is_some_and(|live| Arc::ptr_eq(live, handle))
    }
}

/// Requests from the public handle.
#[derive(Debug)]
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reason: CloseReason,
        ack: oneshot::Sender<()>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HandshakeKind {
    /// Requested through `connect()`.
    Owner,
    /// Started by the reconnect timer.
    Reconnect,
}

pub(crate) struct ConnectionManager {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    shared: ClientShared,
    events: Arc<ClientEvents>,
    broker: Arc<MessageBroker>,
    commands: mpsc::UnboundedReceiver<Command>,

    policy: ReconnectPolicy,
    heartbeat: HeartbeatMonitor,
    reconnect_timer: Timer,
    handshake: Option<(HandshakeKind, BoxFuture<'static, Result<TransportLink>>)>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    link: Option<TransportLink>,
    /// Whether any handshake has ever succeeded.
    established: bool,
}

impl ConnectionManager {
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        shared: ClientShared,
        events: Arc<ClientEvents>,
        broker: Arc<MessageBroker>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            policy: ReconnectPolicy::new(config.reconnect.clone()),
            heartbeat: HeartbeatMonitor::new(config.heartbeat),
            reconnect_timer: Timer::one_shot("reconnect"),
            config,
            connector,
            shared,
            events,
            broker,
            commands,
            handshake: None,
            waiters: Vec::new(),
            link: None,
            established: false,
        }
    }

    /// Drive the connection until the owner closes the client or drops
    /// every handle.
    pub async fn run(mut self) {
        tracing::debug!(target: targets::MANAGER, url = %self.config.url, "connection manager started");
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Connect { reply }) => self.handle_connect(reply),
                    Some(Command::Close { reason, ack }) => {
                        self.shutdown(reason);
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.shutdown(CloseReason::new(CloseCode::Away));
                        break;
                    }
                },
                result = poll_handshake(&mut self.handshake), if self.handshake.is_some() => {
                    self.on_handshake_complete(result);
                }
                event = next_event(&mut self.link), if self.link.is_some() => {
                    self.on_transport_event(event);
                }
                tick = self.heartbeat.tick(), if self.heartbeat.is_running() => {
                    self.on_heartbeat(tick);
                }
                _ = self.reconnect_timer.fired(), if self.reconnect_timer.is_active() => {
                    self.on_reconnect_timer();
                }
            }
        }
        tracing::debug!(target: targets::MANAGER, "connection manager stopped");
    }

    fn is_closed_by_owner(&self) -> bool {
        self.shared.lock().closed_by_owner
    }

    fn set_state(&self, state: ConnectionState) {
        {
            let mut inner = self.shared.lock();
            if inner.state == state {
                return;
            }
            inner.state = state;
        }
        tracing::trace!(target: targets::MANAGER, %state, "state changed");
        self.events.state_changed.emit(state);
    }

    fn handle_connect(&mut self, reply: oneshot::Sender<Result<()>>) {
        let (state, refused) = {
            let inner = self.shared.lock();
            (inner.state, inner.closed_by_owner || inner.terminal)
        };
        if refused {
            let _ = reply.send(Err(NetworkError::state("connect", state)));
            return;
        }
        if state == ConnectionState::Open {
            let _ = reply.send(Ok(()));
            return;
        }

        self.waiters.push(reply);
        if self.handshake.is_some() {
            tracing::trace!(target: targets::MANAGER, "connect joined the handshake in flight");
            return;
        }
        if self.reconnect_timer.is_active() {
            tracing::debug!(target: targets::MANAGER, "connect requested during reconnect wait");
            self.reconnect_timer.stop();
            self.policy.cancel_pending();
            self.sync_reconnect_state();
        }
        self.start_handshake(HandshakeKind::Owner);
    }

    fn start_handshake(&mut self, kind: HandshakeKind) {
        let request = match self.config.handshake_request() {
            Ok(request) => request,
            Err(err) => {
                self.on_handshake_complete_with(kind, Err(err));
                return;
            }
        };

        tracing::debug!(target: targets::MANAGER, url = %request.url, ?kind, "handshake started");
        self.set_state(ConnectionState::Connecting);

        let timeout = self.config.connect_timeout;
        let handshake = self.connector.connect(request);
        self.handshake = Some((
            kind,
            Box::pin(async move {
                match tokio::time::timeout(timeout, handshake).await {
                    Ok(result) => result,
                    Err(_) => Err(NetworkError::Timeout),
                }
            }),
        ));
    }

    fn on_handshake_complete(&mut self, result: Result<TransportLink>) {
        let kind = match self.handshake.take() {
            Some((kind, _)) => kind,
            None => return,
        };
        self.on_handshake_complete_with(kind, result);
    }

    fn on_handshake_complete_with(&mut self, kind: HandshakeKind, result: Result<TransportLink>) {
        match result {
            Ok(link) => self.on_open(link),
            Err(err) => {
                tracing::debug!(target: targets::MANAGER, error = %err, ?kind, "handshake failed");
                self.set_state(ConnectionState::Closed);
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(err.clone()));
                }
                match kind {
                    HandshakeKind::Owner => {
                        self.events.error.emit(err);
                        // A manual connect that interrupted a reconnect wait
                        // hands control back to the schedule.
                        if self.established && self.policy.is_enabled() {
                            self.attempt_reconnect();
                        }
                    }
                    HandshakeKind::Reconnect => {
                        self.events.reconnect_failed.emit(err);
                        self.attempt_reconnect();
                    }
                }
            }
        }
    }

    fn on_open(&mut self, link: TransportLink) {
        self.policy.reset();
        self.established = true;
        {
            let mut inner = self.shared.lock();
            inner.transport = Some(link.handle.clone());
            inner.reconnecting = false;
            inner.reconnect_attempt = 0;
        }
        self.link = Some(link);
        self.heartbeat.start();
        self.set_state(ConnectionState::Open);
        tracing::info!(target: targets::MANAGER, url = %self.config.url, "connection open");
        self.events.opened.emit(());
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(data)) => {
                self.heartbeat.record_activity();
                let message = Message::new(data);
                self.events.message_received.emit(message.clone());
                if let Some(err) = self.broker.deliver(&message) {
                    self.events.error.emit(err);
                }
            }
            Some(TransportEvent::Ping(_)) => self.heartbeat.record_activity(),
            Some(TransportEvent::Pong(_)) => self.heartbeat.record_reply(),
            Some(TransportEvent::Error(err)) => {
                tracing::debug!(target: targets::MANAGER, error = %err, "transport error");
                self.events.error.emit(err);
            }
            Some(TransportEvent::Close(reason)) => self.on_link_closed(reason),
            None => self.on_link_closed(CloseReason::abnormal()),
        }
    }

    /// Common path for every unexpected end of a live link.
    fn on_link_closed(&mut self, reason: CloseReason) {
        self.heartbeat.stop();
        self.link = None;
        self.shared.lock().transport = None;
        self.set_state(ConnectionState::Closed);
        self.broker.close_streams();
        tracing::info!(
            target: targets::MANAGER,
            code = reason.code.as_u16(),
            reason = %reason.reason,
            "connection closed"
        );
        self.events.closed.emit(reason);

        if self.policy.is_enabled() && !self.is_closed_by_owner() {
            self.attempt_reconnect();
        }
    }

    fn on_heartbeat(&mut self, tick: HeartbeatTick) {
        match tick {
            HeartbeatTick::SendPing => {
                let Some(link) = &self.link else {
                    return;
                };
                if let Err(err) = link.handle.send(Frame::Ping(Bytes::new())) {
                    tracing::debug!(target: targets::HEARTBEAT, error = %err, "ping not sent");
                }
                let outstanding = self.heartbeat.awaiting_reply();
                self.heartbeat.ping_sent();
                tracing::trace!(
                    target: targets::HEARTBEAT,
                    outstanding,
                    deadline_in = ?self.heartbeat.watchdog_remaining(),
                    "ping sent"
                );
            }
            HeartbeatTick::Expired => {
                tracing::warn!(
                    target: targets::HEARTBEAT,
                    timeout = ?self.config.heartbeat.timeout,
                    silent_for = ?self.heartbeat.last_activity().map(|at| at.elapsed()),
                    "no traffic after heartbeat ping"
                );
                self.heartbeat.stop();
                self.events.heartbeat_timeout.emit(());

                if self.policy.is_enabled() && !self.is_closed_by_owner() {
                    let reason = CloseReason::heartbeat_timeout();
                    if let Some(link) = &self.link {
                        link.handle.close(reason.clone());
                    }
                    self.on_link_closed(reason);
                } else if self.link.is_some() {
                    self.heartbeat.start();
                }
            }
        }
    }

    fn attempt_reconnect(&mut self) {
        if self.is_closed_by_owner() {
            return;
        }
        match self.policy.next_attempt() {
            ReconnectDecision::Disabled | ReconnectDecision::AlreadyScheduled => {}
            ReconnectDecision::Exhausted { attempts } => {
                tracing::warn!(target: targets::MANAGER, attempts, "reconnect attempts exhausted");
                self.shared.lock().terminal = true;
                self.sync_reconnect_state();
                self.broker.close_streams();
                self.events.reconnect_exhausted.emit(());
            }
            ReconnectDecision::Retry(attempt) => {
                tracing::debug!(
                    target: targets::MANAGER,
                    attempt = attempt.attempt,
                    delay = ?attempt.delay,
                    "reconnect scheduled"
                );
                self.reconnect_timer.start(attempt.delay);
                self.sync_reconnect_state();
                self.events.reconnecting.emit(attempt);
            }
        }
    }

    fn on_reconnect_timer(&mut self) {
        if self.is_closed_by_owner() {
            return;
        }
        self.policy.begin_attempt();
        self.sync_reconnect_state();
        self.start_handshake(HandshakeKind::Reconnect);
    }

    fn sync_reconnect_state(&self) {
        let mut inner = self.shared.lock();
        inner.reconnecting = self.policy.is_reconnecting();
        inner.reconnect_attempt = self.policy.attempt();
    }

    /// Owner close: permanent.
    fn shutdown(&mut self, reason: CloseReason) {
        {
            let mut inner = self.shared.lock();
            inner.closed_by_owner = true;
            inner.terminal = true;
        }
        self.reconnect_timer.stop();
        self.policy.cancel_pending();
        self.sync_reconnect_state();
        self.heartbeat.stop();

        if self.handshake.take().is_some() {
            tracing::debug!(target: targets::MANAGER, "handshake in flight dropped by close");
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(NetworkError::Cancelled));
        }

        let live = self.link.take();
        if let Some(link) = &live {
            self.set_state(ConnectionState::Closing);
            link.handle.close(reason.clone());
        }
        self.shared.lock().transport = None;
        self.set_state(ConnectionState::Closed);
        self.broker.close_streams();

        if live.is_some() {
            tracing::info!(
                target: targets::MANAGER,
                code = reason.code.as_u16(),
                "connection closed by owner"
            );
            self.events.closed.emit(reason);
        }
    }
}

async fn poll_handshake(
    handshake: &mut Option<(HandshakeKind, BoxFuture<'static, Result<TransportLink>>)>,
) -> Result<TransportLink> {
    match handshake {
        Some((_, future)) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_event(link: &mut Option<TransportLink>) -> Option<TransportEvent> {
    match link {
        Some(link) => link.events.recv().await,
        None => std::future::pending().await,
    }
}
