//! Error types for the relay client.

use crate::message::ConnectionState;

/// Errors produced by the relay client.
///
/// The type is `Clone` so that it can be delivered through the client's
/// notification signals as well as returned from calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// Operation attempted in the wrong lifecycle state (e.g. send before open).
    #[error("cannot {operation} while the connection is {state}")]
    State {
        /// The operation that was rejected.
        operation: &'static str,
        /// The state the connection was in.
        state: ConnectionState,
    },
    /// Connection refused or failed.
    #[error("Connection error: {0}")]
    Connection(String),
    /// WebSocket protocol or transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    /// Handshake did not complete within the configured timeout.
    #[error("Handshake timed out")]
    Timeout,
    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    Tls(String),
    /// Proxy tunnel could not be established.
    #[error("Proxy error: {0}")]
    Proxy(String),
    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Invalid header name or value.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    /// Configuration rejected at construction.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
    /// Byte stream unavailable or byte source failed.
    #[error("Stream error: {0}")]
    Stream(String),
    /// Inbound messages could not be queued for the pull consumer.
    #[error("Backpressure: {0}")]
    Backpressure(String),
    /// The operation was stopped by its consumer or by the owner closing the client.
    #[error("Operation was cancelled")]
    Cancelled,
}

impl NetworkError {
    /// Create a state error for `operation` attempted in `state`.
    pub fn state(operation: &'static str, state: ConnectionState) -> Self {
        Self::State { operation, state }
    }

    /// Whether this error represents a voluntary stop rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error is a lifecycle state violation.
    pub fn is_state_error(&self) -> bool {
        matches!(self, Self::State { .. })
    }
}

impl From<url::ParseError> for NetworkError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for NetworkError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for NetworkError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for NetworkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        // TLS failures surface through `Display` on the catch-all arm.
        match err {
            WsError::Io(e) => Self::Connection(e.to_string()),
            WsError::Url(e) => Self::InvalidUrl(e.to_string()),
            other => Self::WebSocket(other.to_string()),
        }
    }
}

/// A specialized Result type for relay operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
