//! # Core observer trait
//!
//! Each observer is driven by a dedicated worker fed by a bounded queue owned
//! by the [`ObserverSet`](crate::observers::ObserverSet). Observers may be slow
//! (exporting metrics over the network, for instance) without delaying the
//! relay or each other; an observer that falls behind loses events (reported
//! as `ObserverOverflow`).

use async_trait::async_trait;

use crate::events::RelayEvent;

/// Contract for relay event observers.
#[async_trait]
pub trait Observe: Send + Sync + 'static {
    /// Handle a single event.
    async fn on_event(&self, event: &RelayEvent);

    /// Human-readable name (for logs/metrics).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this observer's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
