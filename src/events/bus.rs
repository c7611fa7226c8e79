//! # Broadcast bus for relay lifecycle events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]. Publishing never blocks, which
//! matters most for the ingestor: reporting a reconnect or a gap must not stall
//! the append path.
//!
//! ```text
//! Publishers (many):                     Listener (one):
//!   Ingestor    ──┐
//!   Sessions    ──┼──────► Bus ───────► observer listener ────► ObserverSet
//!   Monitor     ──┤  (broadcast chan)     (in Relay::run)
//!   Relay       ──┘
//! ```
//!
//! ## Rules
//! - **Bounded**: one ring shared by all receivers; laggards get `Lagged(n)`.
//! - **Fire-and-forget**: events published with no receiver are dropped.

use tokio::sync::broadcast;

use super::event::RelayEvent;

/// Broadcast channel for [`RelayEvent`]s. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<RelayEvent>,
}

impl Bus {
    /// Creates a new bus with the given capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<RelayEvent>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers.
    pub fn publish(&self, ev: RelayEvent) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }
}
