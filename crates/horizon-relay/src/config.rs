//! Client configuration.

use std::time::Duration;

use base64::Engine;
use url::Url;

use crate::error::{NetworkError, Result};
use crate::reconnect::ReconnectConfig;
use crate::tls::TlsConfig;
use crate::transport::HandshakeRequest;

/// Default capacity of the pull consumer's queue.
pub const DEFAULT_MESSAGE_BUFFER: usize = 1024;
/// Default buffered byte count under which a drain wait resolves.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;
/// Default chunk size used when reading from an `AsyncRead` source.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;
/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Liveness probing while the connection is open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between pings. `Duration::ZERO` disables the monitor.
    pub interval: Duration,
    /// How long to wait for any inbound traffic after a ping.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

impl HeartbeatConfig {
    /// Create a heartbeat configuration.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// A configuration that never pings.
    pub fn disabled() -> Self {
        Self {
            interval: Duration::ZERO,
            timeout: Duration::ZERO,
        }
    }

    /// Whether probing is enabled.
    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }
}

/// HTTP proxy used to tunnel the connection with `CONNECT`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy URL, e.g. `http://proxy.local:3128`.
    pub url: String,
    /// Basic authentication credentials.
    pub credentials: Option<(String, String)>,
}

impl ProxyConfig {
    /// Tunnel through the proxy at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
        }
    }

    /// Authenticate to the proxy with HTTP basic credentials.
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Value of the `Proxy-Authorization` header, if credentials are set.
    pub fn authorization(&self) -> Option<String> {
        self.credentials.as_ref().map(|(user, pass)| {
            let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
            format!("Basic {token}")
        })
    }

    /// Parse and check the proxy URL. Only `http://` proxies are supported.
    pub fn parsed_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url)?;
        if url.scheme() != "http" {
            return Err(NetworkError::InvalidConfig(format!(
                "unsupported proxy scheme '{}', expected http",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(NetworkError::InvalidConfig("proxy URL has no host".into()));
        }
        Ok(url)
    }
}

/// Per-call options for outbound sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendOptions {
    /// Wait until the transport's buffered amount drops below
    /// `high_water_mark` before returning.
    pub await_drain: bool,
    /// Threshold in bytes for the drain wait.
    pub high_water_mark: usize,
    /// Read size used by [`RelayClient::send_reader`](crate::RelayClient::send_reader).
    pub chunk_size: usize,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            await_drain: false,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl SendOptions {
    /// Options with defaults: no drain wait.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options that wait for the outbound buffer to drain.
    pub fn drained() -> Self {
        Self::default().await_drain(true)
    }

    /// Enable or disable the drain wait.
    pub fn await_drain(mut self, await_drain: bool) -> Self {
        self.await_drain = await_drain;
        self
    }

    /// Set the drain threshold in bytes.
    pub fn high_water_mark(mut self, bytes: usize) -> Self {
        self.high_water_mark = bytes;
        self
    }

    /// Set the read size for `AsyncRead` sources.
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Reject zero thresholds.
    pub fn validate(&self) -> Result<()> {
        if self.high_water_mark == 0 {
            return Err(NetworkError::InvalidConfig(
                "high_water_mark must be greater than zero".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(NetworkError::InvalidConfig(
                "chunk_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a [`RelayClient`](crate::RelayClient).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use horizon_relay::{ClientConfig, HeartbeatConfig, ReconnectConfig};
///
/// let config = ClientConfig::new("wss://relay.example.com/socket")
///     .protocol("relay.v1")
///     .header("Authorization", "Bearer token")
///     .heartbeat(HeartbeatConfig::new(Duration::from_secs(15), Duration::from_secs(5)))
///     .reconnect_config(ReconnectConfig::new().max_attempts(10));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// The relay URL (`ws://` or `wss://`).
    pub url: String,
    /// Subprotocols offered in `Sec-WebSocket-Protocol`.
    pub protocols: Vec<String>,
    /// Extra handshake headers, sent in order.
    pub headers: Vec<(String, String)>,
    /// HTTP proxy to tunnel through.
    pub proxy: Option<ProxyConfig>,
    /// TLS settings for `wss://`. `None` uses the bundled web roots.
    pub tls: Option<TlsConfig>,
    /// Automatic reconnection policy.
    pub reconnect: ReconnectConfig,
    /// Heartbeat probing.
    pub heartbeat: HeartbeatConfig,
    /// Request per-message compression.
    pub permessage_deflate: bool,
    /// Capacity of the pull consumer's queue.
    pub message_buffer: usize,
    /// Maximum time a handshake may take.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration for `url` with default settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocols: Vec::new(),
            headers: Vec::new(),
            proxy: None,
            tls: None,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            permessage_deflate: false,
            message_buffer: DEFAULT_MESSAGE_BUFFER,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Offer a subprotocol.
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Offer several subprotocols, in preference order.
    pub fn protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols.extend(protocols.into_iter().map(Into::into));
        self
    }

    /// Add a handshake header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add multiple handshake headers.
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Tunnel through an HTTP proxy.
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set TLS configuration for `wss://` connections.
    pub fn tls_config(mut self, config: TlsConfig) -> Self {
        self.tls = Some(config);
        self
    }

    /// Accept invalid TLS certificates (DANGEROUS - for testing only).
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        let tls = self.tls.get_or_insert_with(TlsConfig::new);
        tls.danger_accept_invalid_certs = true;
        self
    }

    /// Replace the reconnection policy.
    pub fn reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    /// Turn automatic reconnection off.
    pub fn no_reconnect(mut self) -> Self {
        self.reconnect.enabled = false;
        self
    }

    /// Replace the heartbeat settings.
    pub fn heartbeat(mut self, config: HeartbeatConfig) -> Self {
        self.heartbeat = config;
        self
    }

    /// Turn heartbeat probing off.
    pub fn no_heartbeat(mut self) -> Self {
        self.heartbeat = HeartbeatConfig::disabled();
        self
    }

    /// Request per-message compression.
    pub fn permessage_deflate(mut self, enabled: bool) -> Self {
        self.permessage_deflate = enabled;
        self
    }

    /// Set the pull consumer's queue capacity.
    pub fn message_buffer(mut self, capacity: usize) -> Self {
        self.message_buffer = capacity;
        self
    }

    /// Set the handshake timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Check every field, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.parsed_url()?;

        for protocol in &self.protocols {
            if !is_token(protocol) {
                return Err(NetworkError::InvalidConfig(format!(
                    "invalid subprotocol '{protocol}'"
                )));
            }
        }

        for (name, value) in &self.headers {
            http::header::HeaderName::try_from(name.as_str())?;
            http::header::HeaderValue::try_from(value.as_str())?;
        }

        if let Some(proxy) = &self.proxy {
            proxy.parsed_url()?;
        }

        let reconnect = &self.reconnect;
        if !reconnect.backoff_multiplier.is_finite() || reconnect.backoff_multiplier < 1.0 {
            return Err(NetworkError::InvalidConfig(
                "backoff_multiplier must be at least 1".into(),
            ));
        }
        if reconnect.max_delay < reconnect.initial_delay {
            return Err(NetworkError::InvalidConfig(
                "max_delay must not be shorter than initial_delay".into(),
            ));
        }

        if self.heartbeat.is_enabled() && self.heartbeat.timeout.is_zero() {
            return Err(NetworkError::InvalidConfig(
                "heartbeat timeout must be greater than zero".into(),
            ));
        }

        if self.message_buffer == 0 {
            return Err(NetworkError::InvalidConfig(
                "message_buffer must be greater than zero".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(NetworkError::InvalidConfig(
                "connect_timeout must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    fn parsed_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(NetworkError::InvalidUrl(format!(
                    "unsupported scheme '{other}', expected ws or wss"
                )));
            }
        }
        if url.host_str().is_none() {
            return Err(NetworkError::InvalidUrl("URL has no host".into()));
        }
        Ok(url)
    }

    pub(crate) fn handshake_request(&self) -> Result<HandshakeRequest> {
        Ok(HandshakeRequest {
            url: self.parsed_url()?,
            protocols: self.protocols.clone(),
            headers: self.headers.clone(),
            tls: self.tls.clone(),
            proxy: self.proxy.clone(),
            permessage_deflate: self.permessage_deflate,
        })
    }
}

/// RFC 7230 `token`, the grammar of a subprotocol name.
fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}
