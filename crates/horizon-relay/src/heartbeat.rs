//! Liveness detection while the connection is open.
//!
//! The monitor owns two timers: a repeating ping interval and a one-shot
//! watchdog. Each ping arms the watchdog unless one is already pending. A
//! pong answers the outstanding ping and disarms it; any other inbound
//! traffic while it is armed pushes the deadline to `timeout` after that
//! traffic, so expiry always trails the last sign of life by `timeout`.

use std::time::Duration;

use horizon_relay_core::logging::targets;
use horizon_relay_core::Timer;
use tokio::time::Instant;

use crate::config::HeartbeatConfig;

/// What the monitor wants the manager to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HeartbeatTick {
    /// Send a ping now.
    SendPing,
    /// No traffic arrived within the timeout after a ping.
    Expired,
}

#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    config: HeartbeatConfig,
    interval: Timer,
    watchdog: Timer,
    last_activity: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            interval: Timer::repeating("heartbeat-interval"),
            watchdog: Timer::one_shot("heartbeat-watchdog"),
            last_activity: None,
        }
    }

    /// Begin probing. Does nothing when the interval is zero.
    pub fn start(&mut self) {
        self.watchdog.stop();
        self.last_activity = Some(Instant::now());
        if self.config.is_enabled() {
            self.interval.start(self.config.interval);
            tracing::trace!(
                target: targets::HEARTBEAT,
                interval = ?self.config.interval,
                timeout = ?self.config.timeout,
                "heartbeat started"
            );
        }
    }

    /// Disarm both timers.
    pub fn stop(&mut self) {
        self.interval.stop();
        self.watchdog.stop();
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_active() || self.watchdog.is_active()
    }

    /// Whether a ping is waiting for an answer.
    pub fn awaiting_reply(&self) -> bool {
        self.watchdog.is_active()
    }

    /// Time of the most recent inbound traffic since the last start.
    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// A message or ping arrived.
    pub fn record_activity(&mut self) {
        self.last_activity = Some(Instant::now());
        if self.watchdog.is_active() {
            self.watchdog.start(self.config.timeout);
            tracing::trace!(target: targets::HEARTBEAT, "watchdog re-timed by inbound traffic");
        }
    }

    /// A pong arrived; the outstanding ping is answered.
    pub fn record_reply(&mut self) {
        self.last_activity = Some(Instant::now());
        if self.watchdog.is_active() {
            self.watchdog.stop();
            tracing::trace!(target: targets::HEARTBEAT, "ping answered");
        }
    }

    /// A ping went out; make sure the watchdog is running.
    pub fn ping_sent(&mut self) {
        if !self.watchdog.is_active() {
            self.watchdog.start(self.config.timeout);
        }
    }

    /// Time left on the watchdog, if armed.
    pub fn watchdog_remaining(&self) -> Option<Duration> {
        self.watchdog.remaining()
    }

    /// Wait for the next timer to fire. Pending forever while stopped.
    ///
    /// Cancel safe.
    pub async fn tick(&mut self) -> HeartbeatTick {
        let Self {
            interval, watchdog, ..
        } = self;
        tokio::select! {
            biased;
            _ = watchdog.fired(), if watchdog.is_active() => HeartbeatTick::Expired,
            _ = interval.fired(), if interval.is_active() => HeartbeatTick::SendPing,
            else => std::future::pending().await,
        }
    }
}
