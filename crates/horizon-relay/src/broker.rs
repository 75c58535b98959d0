//! Inbound message delivery to the pull consumer and byte-stream taps.
//!
//! Push subscribers are served directly by the `message_received` signal;
//! the broker handles the two pull-style paths. At most one
//! [`MessageStream`] is live per client. Closing the connection drops every
//! sender, so pending `next()` calls resolve with `None` instead of hanging.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use horizon_relay_core::logging::targets;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{NetworkError, Result};
use crate::message::{ConnectionState, Message};

#[derive(Debug)]
pub(crate) struct MessageBroker {
    capacity: usize,
    pull: Mutex<Option<mpsc::Sender<Message>>>,
    taps: Mutex<Vec<mpsc::UnboundedSender<Bytes>>>,
}

impl MessageBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pull: Mutex::new(None),
            taps: Mutex::new(Vec::new()),
        }
    }

    /// Register the pull consumer.
    ///
    /// Fails while another stream is still alive. A `finished` broker hands
    /// out a stream that is already over.
    pub fn subscribe(&self, state: ConnectionState, finished: bool) -> Result<MessageStream> {
        if finished {
            return Ok(MessageStream { receiver: None });
        }
        let mut pull = self.pull.lock();
        if pull.as_ref().is_some_and(|sender| !sender.is_closed()) {
            return Err(NetworkError::state("iterate messages twice", state));
        }
        let (sender, receiver) = mpsc::channel(self.capacity);
        *pull = Some(sender);
        Ok(MessageStream {
            receiver: Some(receiver),
        })
    }

    /// Open a new byte-stream tap.
    pub fn tap(&self) -> ByteStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.taps.lock().push(sender);
        ByteStream { receiver }
    }

    /// Hand `message` to the pull consumer and the taps.
    ///
    /// Returns the overflow error when the pull consumer's queue is full.
    pub fn deliver(&self, message: &Message) -> Option<NetworkError> {
        let overflow = {
            let mut pull = self.pull.lock();
            match pull.as_ref().map(|sender| sender.try_send(message.clone())) {
                None | Some(Ok(())) => None,
                Some(Err(TrySendError::Closed(_))) => {
                    *pull = None;
                    None
                }
                Some(Err(TrySendError::Full(_))) => {
                    tracing::warn!(
                        target: targets::BROKER,
                        capacity = self.capacity,
                        "pull consumer is behind, message dropped from its queue"
                    );
                    Some(NetworkError::Backpressure(format!(
                        "message queue full ({} messages)",
                        self.capacity
                    )))
                }
            }
        };

        let mut taps = self.taps.lock();
        if !taps.is_empty() {
            let payload = message.data().clone().into_bytes();
            taps.retain(|tap| tap.send(payload.clone()).is_ok());
        }

        overflow
    }

    /// End the pull stream and every tap.
    pub fn close_streams(&self) {
        let had_pull = self.pull.lock().take().is_some();
        let taps = std::mem::take(&mut *self.taps.lock());
        if had_pull || !taps.is_empty() {
            tracing::trace!(
                target: targets::BROKER,
                taps = taps.len(),
                "inbound streams finished"
            );
        }
    }
}

/// The single pull consumer of inbound messages.
///
/// Yields messages in arrival order and ends when the connection closes.
/// Also usable as a [`futures_util::Stream`].
#[derive(Debug)]
pub struct MessageStream {
    receiver: Option<mpsc::Receiver<Message>>,
}

impl MessageStream {
    /// Wait for the next message. `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Message> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }

    /// Stop consuming. Queued messages are discarded and the client may hand
    /// out a new stream.
    pub fn cancel(&mut self) {
        self.receiver = None;
    }

    /// Whether the stream has been cancelled or was created finished.
    pub fn is_cancelled(&self) -> bool {
        self.receiver.is_none()
    }
}

impl Stream for MessageStream {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

/// Inbound payloads as a stream of byte chunks, one per message.
#[derive(Debug)]
pub struct ByteStream {
    receiver: mpsc::UnboundedReceiver<Bytes>,
}

impl ByteStream {
    /// Wait for the next chunk. `None` once the connection has closed.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }
}

impl Stream for ByteStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.receiver.poll_recv(cx)
    }
}
