//! # Fan-out dispatcher: registry of subscriber sessions.
//!
//! The dispatcher validates subscribe requests, creates sessions and spawns
//! one task per session. It does not push events itself: every session pulls
//! from the shared buffer and is woken by the tail watch on each append, so
//! the ingestor's write path never waits on subscribers.
//!
//! ```text
//! subscribe(cursor)
//!     ├─► cursor < head ──────────► Err(CursorTooOld)      (SubscribeRejected)
//!     ├─► cursor = None ──────────► start at tail + 1 (or first append if empty)
//!     └─► cursor ≥ head ──────────► start at cursor (replay, then live)
//!             │
//!             ├─► SessionState into registry (id never reused)
//!             └─► tracker.spawn(Session::run) ──► on exit: removed from registry
//! ```
//!
//! ## Rules
//! - Session ids come from a monotonically increasing counter.
//! - Session tokens are children of the relay token: shutdown cancels all.
//! - A session removes itself from the registry when its task ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::admin::SessionStats;
use crate::buffer::BufferReader;
use crate::config::Config;
use crate::core::session::{Session, SessionParams, SessionState, Subscription};
use crate::error::RelayError;
use crate::events::{Bus, EventKind, RelayEvent};

pub(crate) struct Dispatcher {
    reader: BufferReader,
    sessions: RwLock<HashMap<u64, Arc<SessionState>>>,
    next_id: AtomicU64,
    params: SessionParams,
    queue_capacity: usize,
    bus: Bus,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(
        reader: BufferReader,
        cfg: &Config,
        bus: Bus,
        tracker: TaskTracker,
        token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            reader,
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            params: SessionParams {
                batch_delay: cfg.batch_delay,
                batch_max_events: cfg.batch_max_events,
                lag_threshold: cfg.lag_threshold,
            },
            queue_capacity: cfg.session_queue_capacity.max(1),
            bus,
            tracker,
            token,
        })
    }

    /// Opens a session starting at `cursor` (see module docs for resolution).
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        cursor: Option<u64>,
    ) -> Result<Subscription, RelayError> {
        if self.token.is_cancelled() {
            return Err(RelayError::connection("relay is shutting down"));
        }

        let snap = self.reader.snapshot();
        let start = match cursor {
            None => snap.tail.map(|t| t.saturating_add(1)),
            Some(c) => {
                if let Some(head) = snap.head.filter(|&h| c < h) {
                    let err = RelayError::CursorTooOld { cursor: c, head };
                    self.bus.publish(
                        RelayEvent::new(EventKind::SubscribeRejected)
                            .with_seq(c)
                            .with_reason(err.to_string()),
                    );
                    return Err(err);
                }
                Some(c)
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(SessionState::new(
            id,
            start.map(|c| (c, self.reader.offset_before(c))),
            self.queue_capacity,
            self.token.child_token(),
        ));

        self.sessions.write().insert(id, Arc::clone(&state));
        self.bus.publish(
            RelayEvent::new(EventKind::SessionOpened)
                .with_session(id)
                .with_seq_opt(start),
        );

        let session = Session::new(
            Arc::clone(&state),
            self.reader.clone(),
            self.bus.clone(),
            self.params,
        );
        let me = Arc::clone(self);
        self.tracker.spawn(async move {
            session.run().await;
            me.sessions.write().remove(&id);
        });

        Ok(Subscription::new(state))
    }

    /// Cancels session `id`. Returns `false` if no such session is active.
    pub(crate) fn unsubscribe(&self, id: u64) -> bool {
        match self.sessions.read().get(&id) {
            Some(state) => {
                state.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of active sessions.
    pub(crate) fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Ids of sessions whose task is still registered.
    pub(crate) fn session_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.sessions.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Per-session counters, ordered by id.
    pub(crate) fn sessions(&self) -> Vec<SessionStats> {
        let snap = self.reader.snapshot();
        let mut out: Vec<SessionStats> = self
            .sessions
            .read()
            .values()
            .filter(|s| !s.is_closed())
            .map(|s| SessionStats {
                id: s.id(),
                mode: s.mode(),
                cursor: s.cursor(),
                lag_count: s.lag(snap.tail),
                lag_bytes: s.lag_bytes(snap.total_bytes),
                queued: s.queued(),
            })
            .collect();
        out.sort_unstable_by_key(|s| s.id);
        out
    }

    /// Evicts every session lagging more than the threshold behind `tail`.
    ///
    /// Returns the number of sessions evicted by this call.
    pub(crate) fn evict_lagging(&self, tail: Option<u64>) -> usize {
        let threshold = self.params.lag_threshold;
        let lagging: Vec<(Arc<SessionState>, u64)> = self
            .sessions
            .read()
            .values()
            .filter(|s| !s.is_closed())
            .filter_map(|s| {
                let lag = s.lag(tail);
                (lag > threshold).then(|| (Arc::clone(s), lag))
            })
            .collect();

        for (state, lag) in &lagging {
            state.close(RelayError::SubscriberTooSlow {
                lag: *lag,
                threshold,
            });
        }
        lagging.len()
    }

    /// Cancels every session.
    pub(crate) fn close_all(&self) {
        for state in self.sessions.read().values() {
            state.cancel();
        }
    }
}
