//! Cancellable one-shot and repeating timers.
//!
//! A [`Timer`] is an explicit scheduled-task handle that is owned by exactly
//! one component and polled from that component's task (typically one arm of
//! a `tokio::select!` loop). Arming replaces any previous deadline and
//! stopping drops it, so a timer that has been stopped can never fire
//! afterwards. An inactive timer's [`fired`](Timer::fired) future never
//! completes.
//!
//! ```
//! use std::time::Duration;
//! use horizon_relay_core::Timer;
//!
//! # async fn demo() {
//! let mut watchdog = Timer::one_shot("watchdog");
//! watchdog.start(Duration::from_millis(30));
//!
//! tokio::select! {
//!     _ = watchdog.fired(), if watchdog.is_active() => println!("expired"),
//!     _ = tokio::time::sleep(Duration::from_millis(10)) => watchdog.stop(),
//! }
//! # }
//! ```

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

use crate::logging::targets;

/// The type of timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires once after the specified duration, then becomes inactive.
    OneShot,
    /// Fires repeatedly at the specified interval until stopped.
    Repeating,
}

/// A cancellable timer owned by a single component.
pub struct Timer {
    name: &'static str,
    kind: TimerKind,
    /// The period for repeating timers (and the last duration for one-shots).
    period: Duration,
    /// The pending deadline. `None` while the timer is inactive.
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Timer {
    /// Create an inactive one-shot timer.
    pub fn one_shot(name: &'static str) -> Self {
        Self::new(name, TimerKind::OneShot)
    }

    /// Create an inactive repeating timer.
    pub fn repeating(name: &'static str) -> Self {
        Self::new(name, TimerKind::Repeating)
    }

    fn new(name: &'static str, kind: TimerKind) -> Self {
        Self {
            name,
            kind,
            period: Duration::ZERO,
            sleep: None,
        }
    }

    /// The name used in trace output.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The kind of this timer.
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Arm the timer to fire after `duration`.
    ///
    /// Any previously armed deadline is discarded. For repeating timers the
    /// duration also becomes the interval between subsequent fires.
    pub fn start(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        self.period = duration;
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(tokio::time::sleep_until(deadline))),
        }
        tracing::trace!(target: targets::TIMER, timer = self.name, ?duration, "timer armed");
    }

    /// Disarm the timer. Does nothing if it is not active.
    pub fn stop(&mut self) {
        if self.sleep.take().is_some() {
            tracing::trace!(target: targets::TIMER, timer = self.name, "timer stopped");
        }
    }

    /// Check if the timer is currently armed.
    pub fn is_active(&self) -> bool {
        self.sleep.is_some()
    }

    /// The instant at which the timer will next fire, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|sleep| sleep.deadline())
    }

    /// The time remaining until the next fire, if armed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Wait for the timer to fire.
    ///
    /// Never completes while the timer is inactive. After a one-shot timer
    /// fires it becomes inactive; a repeating timer is re-armed one period
    /// after the deadline that just elapsed.
    ///
    /// Cancel safe: dropping the future before it completes leaves the timer
    /// untouched.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().await,
            None => std::future::pending::<()>().await,
        }
        self.after_fire();
    }

    fn after_fire(&mut self) {
        tracing::trace!(target: targets::TIMER, timer = self.name, "timer fired");
        match self.kind {
            TimerKind::OneShot => self.sleep = None,
            TimerKind::Repeating => {
                if let Some(sleep) = self.sleep.as_mut() {
                    let next = sleep.deadline() + self.period;
                    sleep.as_mut().reset(next);
                }
            }
        }
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("period", &self.period)
            .field("active", &self.is_active())
            .finish()
    }
}
