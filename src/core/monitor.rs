//! # Backpressure monitor.
//!
//! Periodically compares every session's cursor with the buffer tail and
//! evicts sessions whose lag exceeds the threshold. Sessions also check
//! themselves after each pull; the monitor covers the case the session cannot,
//! a task parked on a full outgoing queue while the tail runs away.
//!
//! The scan only takes read locks: one for the buffer tail, one over the
//! session registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::buffer::BufferReader;
use crate::core::dispatcher::Dispatcher;

pub(crate) struct Monitor {
    reader: BufferReader,
    dispatcher: Arc<Dispatcher>,
    every: Duration,
}

impl Monitor {
    pub(crate) fn new(reader: BufferReader, dispatcher: Arc<Dispatcher>, every: Duration) -> Self {
        Self {
            reader,
            dispatcher,
            every,
        }
    }

    /// One scan; returns how many sessions were evicted.
    pub(crate) fn scan(&self) -> usize {
        self.dispatcher.evict_lagging(self.reader.tail())
    }

    pub(crate) async fn run(self, token: CancellationToken) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.scan();
                    if evicted > 0 {
                        debug!(target: "relay", evicted, "backpressure scan evicted sessions");
                    }
                }
            }
        }
    }
}
