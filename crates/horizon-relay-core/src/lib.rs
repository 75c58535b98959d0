//! Core primitives for Horizon Relay.
//!
//! This crate provides the building blocks the connection engine is made of:
//!
//! - **Signals**: Typed notification channels with any number of slots
//! - **Timers**: Explicit, cancellable one-shot and repeating timers that are
//!   owned by one component and polled from its task
//! - **Logging**: `tracing` target names for every subsystem
//!
//! # Signal Example
//!
//! ```
//! use horizon_relay_core::Signal;
//!
//! let attempt_scheduled = Signal::<u32>::new();
//! let conn_id = attempt_scheduled.connect(|attempt| {
//!     println!("reconnect attempt {}", attempt);
//! });
//!
//! attempt_scheduled.emit(1);
//! attempt_scheduled.disconnect(conn_id);
//! ```

pub mod logging;
pub mod signal;
mod timer;

pub use signal::{ConnectionId, Signal};
pub use timer::{Timer, TimerKind};
