//! Push notifications for relay lifecycle events.
//!
//! [`Signal<Args>`] is the multi-listener callback list behind every
//! `RelayClient` event (`open`, `message`, `reconnecting`, ...). Listeners
//! run synchronously on the task that emits, in the order they were
//! connected, and receive the payload by reference.
//!
//! The listener table is never locked while a listener runs. A listener may
//! therefore connect or disconnect listeners on the signal that is calling
//! it; such changes apply from the next emission onwards.
//!
//! ```
//! use horizon_relay_core::Signal;
//!
//! let reconnecting = Signal::<u32>::new();
//! let id = reconnecting.connect(|attempt| println!("reconnect attempt {attempt}"));
//! reconnecting.emit(1);
//! assert!(reconnecting.disconnect(id));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::logging::targets;

new_key_type! {
    /// Handle for one listener, accepted by [`Signal::disconnect`].
    pub struct ConnectionId;
}

type Listener<Args> = Arc<dyn Fn(&Args) + Send + Sync>;

/// Listener table. Slot keys are
/// reused after removal, so each entry carries a sequence number that
/// fixes its position in the call order.
struct Listeners<Args> {
    table: Mutex<SlotMap<ConnectionId, (u64, Listener<Args>)>>,
    next_seq: AtomicU64,
}

impl<Args> Listeners<Args> {
    fn insert(&self, listener: Listener<Args>) -> ConnectionId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.table.lock().insert((seq, listener))
    }

    fn remove(&self, id: ConnectionId) -> bool {
        self.table.lock().remove(id).is_some()
    }

    fn len(&self) -> usize {
        self.table.lock().len()
    }

    fn snapshot(&self) -> Vec<Listener<Args>> {
        let mut entries: Vec<(u64, Listener<Args>)> =
            self.table.lock().values().cloned().collect();
        entries.sort_unstable_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, listener)| listener).collect()
    }
}

/// A typed event with any number of listeners.
///
/// `Signal` is `Send + Sync` whenever `Args` is `Send`. Use `()` for events
/// without a payload.
pub struct Signal<Args> {
    listeners: Listeners<Args>,
}

impl<Args: Send + 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: Send + 'static> Signal<Args> {
    pub fn new() -> Self {
        Self {
            listeners: Listeners {
                table: Mutex::new(SlotMap::with_key()),
                next_seq: AtomicU64::new(0),
            },
        }
    }

    /// Add a listener. It stays connected until [`disconnect`](Self::disconnect)
    /// or [`disconnect_all`](Self::disconnect_all).
    pub fn connect<F>(&self, listener: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.listeners.insert(Arc::new(listener))
    }

    /// Returns `false` when `id` was not connected.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.listeners.remove(id)
    }

    pub fn disconnect_all(&self) {
        self.listeners.table.lock().clear();
    }

    pub fn connection_count(&self) -> usize {
        self.listeners.len()
    }

    /// Call every listener with `args`.
    pub fn emit(&self, args: Args) {
        let listeners = self.listeners.snapshot();
        if listeners.is_empty() {
            return;
        }
        tracing::trace!(target: targets::SIGNAL, listeners = listeners.len(), "emit");
        for listener in &listeners {
            listener(&args);
        }
    }
}

impl<Args> std::fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
