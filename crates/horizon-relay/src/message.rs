//! Message types, close codes and connection state.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Lifecycle state of the client's connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// A handshake is in progress.
    Connecting,
    /// Handshake done; frames flow both ways.
    Open,
    /// The owner requested closure and the transport is shutting down.
    Closing,
    /// No live connection. Reconnection may be pending if enabled.
    #[default]
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Close status codes (RFC 6455 section 7.4.1). The 4000-4999 private range
/// is where this client puts its own codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CloseCode {
    /// 1000
    #[default]
    Normal,
    /// 1001, the peer is shutting down or navigating away.
    Away,
    /// 1002
    Protocol,
    /// 1003, a frame type the peer cannot handle.
    Unsupported,
    /// 1005, never sent on the wire: the close frame carried no code.
    NoStatus,
    /// 1006, never sent on the wire: the transport died without a close
    /// frame.
    Abnormal,
    /// 1007, payload inconsistent with its frame type.
    Invalid,
    /// 1008
    Policy,
    /// 1009
    TooBig,
    /// 1010
    Extension,
    /// 1011, the server hit an internal error.
    Error,
    /// 1012
    Restart,
    /// 1013, overloaded; retry later.
    Again,
    /// 4000, sent by the heartbeat watchdog before recycling a silent
    /// connection.
    HeartbeatTimeout,
    Custom(u16),
}

const KNOWN_CODES: [(CloseCode, u16); 14] = [
    (CloseCode::Normal, 1000),
    (CloseCode::Away, 1001),
    (CloseCode::Protocol, 1002),
    (CloseCode::Unsupported, 1003),
    (CloseCode::NoStatus, 1005),
    (CloseCode::Abnormal, 1006),
    (CloseCode::Invalid, 1007),
    (CloseCode::Policy, 1008),
    (CloseCode::TooBig, 1009),
    (CloseCode::Extension, 1010),
    (CloseCode::Error, 1011),
    (CloseCode::Restart, 1012),
    (CloseCode::Again, 1013),
    (CloseCode::HeartbeatTimeout, CloseCode::HEARTBEAT_TIMEOUT),
];

impl CloseCode {
    pub const HEARTBEAT_TIMEOUT: u16 = 4000;

    pub fn as_u16(&self) -> u16 {
        if let Self::Custom(code) = self {
            return *code;
        }
        KNOWN_CODES
            .iter()
            .find_map(|(known, number)| (known == self).then_some(*number))
            .unwrap_or_default()
    }

    /// Named variant for `code` when there is one, `Custom` otherwise.
    pub fn from_u16(code: u16) -> Self {
        KNOWN_CODES
            .iter()
            .find_map(|(known, number)| (*number == code).then_some(*known))
            .unwrap_or(Self::Custom(code))
    }

    /// Whether the code lies in the private 4000-4999 range.
    pub fn is_client_reserved(&self) -> bool {
        (4000..=4999).contains(&self.as_u16())
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self::from_u16(code)
    }
}

/// Why a connection ended, as carried by the close frame or synthesized
/// locally.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloseReason {
    pub code: CloseCode,
    /// Human-readable reason; empty when none was given.
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: CloseCode) -> Self {
        Self {
            code,
            reason: String::new(),
        }
    }

    pub fn with_reason(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// 1000 with an empty reason.
    pub fn normal() -> Self {
        Self::new(CloseCode::Normal)
    }

    /// The close reason reported when the transport vanished without a
    /// close frame.
    pub fn abnormal() -> Self {
        Self::new(CloseCode::Abnormal)
    }

    /// The close reason used when the heartbeat watchdog expires.
    pub fn heartbeat_timeout() -> Self {
        Self::with_reason(CloseCode::HeartbeatTimeout, "heartbeat timeout")
    }
}

/// Payload of a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageData {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl MessageData {
    /// Whether this is a binary payload.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// The payload as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    /// Length of the payload in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume into bytes.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Binary(data) => data,
        }
    }
}

impl From<String> for MessageData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for MessageData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Bytes> for MessageData {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

impl From<Vec<u8>> for MessageData {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(data))
    }
}

impl From<&[u8]> for MessageData {
    fn from(data: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(data))
    }
}

/// An inbound message delivered to subscribers and to the pull consumer.
#[derive(Clone, Debug)]
pub struct Message {
    data: MessageData,
    received_at: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(data: impl Into<MessageData>) -> Self {
        Self {
            data: data.into(),
            received_at: Utc::now(),
        }
    }

    /// The payload.
    pub fn data(&self) -> &MessageData {
        &self.data
    }

    /// Whether the message arrived as a binary frame.
    pub fn is_binary(&self) -> bool {
        self.data.is_binary()
    }

    /// The text payload, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match &self.data {
            MessageData::Text(text) => Some(text),
            MessageData::Binary(_) => None,
        }
    }

    /// The payload as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// When the message was received.
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Deserialize the payload (text or binary) as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(self.as_bytes())?)
    }

    /// Consume the message, returning its payload.
    pub fn into_data(self) -> MessageData {
        self.data
    }
}

impl PartialEq for Message {
    /// Messages compare by payload; arrival time is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_conversion() {
        assert_eq!(CloseCode::Normal.as_u16(), 1000);
        assert_eq!(CloseCode::Away.as_u16(), 1001);
        assert_eq!(CloseCode::Error.as_u16(), 1011);
        assert_eq!(CloseCode::HeartbeatTimeout.as_u16(), 4000);
        assert_eq!(CloseCode::Custom(4001).as_u16(), 4001);

        assert_eq!(CloseCode::from_u16(1000), CloseCode::Normal);
        assert_eq!(CloseCode::from_u16(1006), CloseCode::Abnormal);
        assert_eq!(CloseCode::from_u16(4000), CloseCode::HeartbeatTimeout);
        assert_eq!(CloseCode::from_u16(4001), CloseCode::Custom(4001));
    }

    #[test]
    fn test_client_reserved_range() {
        assert!(CloseCode::HeartbeatTimeout.is_client_reserved());
        assert!(CloseCode::Custom(4999).is_client_reserved());
        assert!(!CloseCode::Normal.is_client_reserved());
        assert!(!CloseCode::Custom(3000).is_client_reserved());
    }

    #[test]
    fn test_close_reason() {
        let reason = CloseReason::normal();
        assert_eq!(reason.code, CloseCode::Normal);
        assert!(reason.reason.is_empty());

        let reason = CloseReason::heartbeat_timeout();
        assert_eq!(reason.code.as_u16(), 4000);
        assert_eq!(reason.reason, "heartbeat timeout");
    }

    #[test]
    fn test_message_accessors() {
        let text = Message::new("hello");
        assert!(!text.is_binary());
        assert_eq!(text.as_text(), Some("hello"));
        assert_eq!(text.as_bytes(), b"hello");

        let binary = Message::new(vec![1u8, 2, 3]);
        assert!(binary.is_binary());
        assert_eq!(binary.as_text(), None);
        assert_eq!(binary.data().len(), 3);
    }

    #[test]
    fn test_message_json() {
        let message = Message::new(r#"{"a":1}"#);
        let value: serde_json::Value = message.json().unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));

        let broken = Message::new("{");
        assert!(broken.json::<serde_json::Value>().is_err());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Open.to_string(), "Open");
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
    }
}
