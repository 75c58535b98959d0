//! Logging facilities for Horizon Relay.
//!
//! Horizon Relay uses the `tracing` crate for instrumentation and never
//! installs a subscriber itself. To see logs, install one in your
//! application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_relay=debug,horizon_relay_core=info")
//!     .init();
//! ```

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core primitives target.
    pub const CORE: &str = "horizon_relay_core";
    /// Timer system target.
    pub const TIMER: &str = "horizon_relay_core::timer";
    /// Signal system target.
    pub const SIGNAL: &str = "horizon_relay_core::signal";

    /// Client crate target.
    pub const CLIENT: &str = "horizon_relay";
    /// Connection lifecycle (handshakes, open/close, reconnect scheduling).
    pub const MANAGER: &str = "horizon_relay::manager";
    /// Heartbeat pings and watchdog.
    pub const HEARTBEAT: &str = "horizon_relay::heartbeat";
    /// Inbound message fan-out.
    pub const BROKER: &str = "horizon_relay::broker";
    /// Outbound flow control and streaming.
    pub const OUTBOUND: &str = "horizon_relay::outbound";
    /// Transport implementations.
    pub const TRANSPORT: &str = "horizon_relay::transport";
}
