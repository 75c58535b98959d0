//! Best-effort outbound flow control.

use std::sync::Arc;
use std::time::Duration;

use horizon_relay_core::logging::targets;

use crate::config::SendOptions;
use crate::error::Result;
use crate::manager::ClientShared;
use crate::transport::{Frame, TransportHandle};

/// How often the buffered amount is sampled while waiting for a drain.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Writes a frame and optionally waits for the transport's outbound buffer
/// to fall below the high-water mark.
///
/// The wait also ends as soon as the connection leaves `Open` or the handle
/// is replaced by a reconnect, so it never outlives the link it was
/// measuring.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BackpressureGate {
    poll_interval: Duration,
}

impl Default for BackpressureGate {
    fn default() -> Self {
        Self {
            poll_interval: DRAIN_POLL_INTERVAL,
        }
    }
}

impl BackpressureGate {
    pub async fn send(
        &self,
        shared: &ClientShared,
        handle: &Arc<dyn TransportHandle>,
        frame: Frame,
        options: &SendOptions,
    ) -> Result<()> {
        handle.send(frame)?;
        if !options.await_drain {
            return Ok(());
        }

        let mut polls = 0u32;
        while handle.buffered_amount() >= options.high_water_mark {
            if !shared.is_current(handle) {
                tracing::trace!(target: targets::OUTBOUND, "drain wait ended by link change");
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;
        }
        if polls > 0 {
            tracing::trace!(
                target: targets::OUTBOUND,
                polls,
                buffered = handle.buffered_amount(),
                "drain wait finished"
            );
        }
        Ok(())
    }
}
