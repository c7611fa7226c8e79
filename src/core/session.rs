//! # Subscriber session: one task per downstream subscriber.
//!
//! A session pulls events from the shared buffer starting at its cursor,
//! batches them, and pushes batches into a bounded outgoing queue read by the
//! subscriber's [`Subscription`]. Replay and live delivery are the same loop:
//! replay is simply the phase where the slice from the cursor is non-empty,
//! and the session turns `live` once a pull exhausts the slice.
//!
//! ```text
//!               watch<tail> (wake)
//!                     │
//!  BufferReader ──► pull(cursor..) ──► Batcher ──► outbox<Batch> ──► Subscription::next_batch
//!                     │                  │          (bounded, in SessionState)
//!                     └── lag check      └── flush on size / delay
//! ```
//!
//! ## Rules
//! - Delivery per session is strictly ascending `seq` with no gaps and no duplicates.
//! - The session never pulls more than one batch ahead of its outgoing queue,
//!   so a slow subscriber stalls its cursor and shows up as lag.
//! - Lag is `tail + 1 - cursor` (events appended but not yet pulled).
//! - Eviction records the reason, cancels the task and empties the outbox from
//!   the evicting side, so a stalled subscriber pins no events; it sees the
//!   error on its next read.
//! - Dropping the [`Subscription`] cancels the session immediately.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::buffer::BufferReader;
use crate::core::batch::{Batch, Batcher};
use crate::error::RelayError;
use crate::events::{Bus, EventKind, RelayEvent};

/// Delivery phase of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Still catching up from the requested cursor.
    Replaying,
    /// Caught up with the tail; receives events as they are appended.
    Live,
}

/// Position and lifecycle state shared by a session task, its subscription,
/// the dispatcher and the monitor.
pub(crate) struct SessionState {
    id: u64,
    initialized: AtomicBool,
    cursor: AtomicU64,
    offset: AtomicU64,
    live: AtomicBool,
    outbox: Mutex<VecDeque<Batch>>,
    outbox_capacity: usize,
    filled: Notify,
    drained: Notify,
    reason: Mutex<Option<RelayError>>,
    token: CancellationToken,
}

impl SessionState {
    /// `queue` bounds the outbox in batches (min 1).
    pub(crate) fn new(
        id: u64,
        start: Option<(u64, u64)>,
        queue: usize,
        token: CancellationToken,
    ) -> Self {
        let (cursor, offset) = start.unwrap_or((0, 0));
        Self {
            id,
            initialized: AtomicBool::new(start.is_some()),
            cursor: AtomicU64::new(cursor),
            offset: AtomicU64::new(offset),
            live: AtomicBool::new(false),
            outbox: Mutex::new(VecDeque::new()),
            outbox_capacity: queue.max(1),
            filled: Notify::new(),
            drained: Notify::new(),
            reason: Mutex::new(None),
            token,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Next sequence to pull, `None` while uninitialized.
    pub(crate) fn cursor(&self) -> Option<u64> {
        self.initialized
            .load(Ordering::Acquire)
            .then(|| self.cursor.load(Ordering::Acquire))
    }

    fn set_position(&self, cursor: u64, offset: u64) {
        self.offset.store(offset, Ordering::Release);
        self.cursor.store(cursor, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
    }

    pub(crate) fn mode(&self) -> SessionMode {
        if self.live.load(Ordering::Acquire) {
            SessionMode::Live
        } else {
            SessionMode::Replaying
        }
    }

    /// Events sitting in the outbox, not yet read by the subscriber.
    pub(crate) fn queued(&self) -> usize {
        self.outbox.lock().iter().map(Vec::len).sum()
    }

    /// Queues `batch` for the subscriber, or hands it back when the outbox is full.
    ///
    /// A closed session swallows the batch.
    fn offer(&self, batch: Batch) -> Result<(), Batch> {
        {
            let mut outbox = self.outbox.lock();
            if self.token.is_cancelled() {
                return Ok(());
            }
            if outbox.len() >= self.outbox_capacity {
                return Err(batch);
            }
            outbox.push_back(batch);
        }
        self.filled.notify_one();
        Ok(())
    }

    fn take(&self) -> Option<Batch> {
        let batch = self.outbox.lock().pop_front();
        if batch.is_some() {
            self.drained.notify_one();
        }
        batch
    }

    /// Drops every queued batch.
    fn release_outbox(&self) {
        let released = std::mem::take(&mut *self.outbox.lock());
        drop(released);
        self.drained.notify_one();
    }

    /// Events appended up to `tail` that this session has not pulled yet.
    pub(crate) fn lag(&self, tail: Option<u64>) -> u64 {
        match (self.cursor(), tail) {
            (Some(cursor), Some(tail)) => tail.saturating_add(1).saturating_sub(cursor),
            _ => 0,
        }
    }

    /// Payload bytes between this session's position and `total_bytes`.
    pub(crate) fn lag_bytes(&self, total_bytes: u64) -> u64 {
        if self.initialized.load(Ordering::Acquire) {
            total_bytes.saturating_sub(self.offset.load(Ordering::Acquire))
        } else {
            0
        }
    }

    /// Records why the session ends (first reason wins), cancels it and
    /// releases whatever the subscriber has not read yet.
    pub(crate) fn close(&self, reason: RelayError) {
        {
            let mut slot = self.reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.token.cancel();
        self.release_outbox();
    }

    pub(crate) fn close_reason(&self) -> Option<RelayError> {
        self.reason.lock().clone()
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Per-session tuning, copied from the relay configuration.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SessionParams {
    pub batch_delay: Duration,
    pub batch_max_events: usize,
    pub lag_threshold: u64,
}

/// The session task. Consumed by [`Session::run`].
pub(crate) struct Session {
    state: Arc<SessionState>,
    reader: BufferReader,
    bus: Bus,
    params: SessionParams,
    pulled_any: bool,
}

impl Session {
    pub(crate) fn new(
        state: Arc<SessionState>,
        reader: BufferReader,
        bus: Bus,
        params: SessionParams,
    ) -> Self {
        Self {
            state,
            reader,
            bus,
            params,
            pulled_any: false,
        }
    }

    /// Runs until the subscriber goes away, the session is cancelled, or it fails.
    pub(crate) async fn run(mut self) {
        let token = self.state.token.clone();
        let mut tail_rx = self.reader.watch_tail();
        let mut tail_open = true;
        let mut batcher = Batcher::new(
            self.params.batch_delay,
            self.params.batch_max_events,
            Instant::now(),
        );

        let failure = loop {
            if token.is_cancelled() {
                break None;
            }
            tail_rx.borrow_and_update();

            if let Err(e) = self.pull(&mut batcher) {
                break Some(e);
            }
            if let Some(e) = self.check_lag() {
                break Some(e);
            }

            let now = Instant::now();
            if batcher.is_due(now) {
                if !self.deliver(batcher.drain(now), &token).await {
                    break None;
                }
                continue;
            }

            let deadline = batcher.deadline();
            tokio::select! {
                _ = token.cancelled() => break None,
                changed = tail_rx.changed(), if tail_open => {
                    if changed.is_err() {
                        tail_open = false;
                    }
                }
                _ = sleep_until(deadline.unwrap_or(now)), if deadline.is_some() => {}
            }
        };

        batcher.clear();
        match failure {
            Some(e) => self.state.close(e),
            None if self.state.close_reason().is_some() => self.state.release_outbox(),
            None => {}
        }
        self.report_exit();
    }

    /// Waits for outbox room and queues `batch`. `false` once cancelled.
    async fn deliver(&self, mut batch: Batch, token: &CancellationToken) -> bool {
        loop {
            let drained = self.state.drained.notified();
            match self.state.offer(batch) {
                Ok(()) => return !token.is_cancelled(),
                Err(back) => batch = back,
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => return false,
                _ = drained => {}
            }
        }
    }

    /// Moves up to one batch worth of events from the buffer into `batcher`.
    fn pull(&mut self, batcher: &mut Batcher) -> Result<(), RelayError> {
        let room = batcher.room();
        if room == 0 {
            return Ok(());
        }

        let cursor = match self.state.cursor() {
            Some(c) => c,
            None => match self.reader.head() {
                Some(head) => {
                    self.state
                        .set_position(head, self.reader.offset_before(head));
                    head
                }
                None => return Ok(()),
            },
        };

        let mut slice = self.reader.slice(cursor).map_err(|e| self.fell_behind(e))?;
        let mut advanced = None;
        for item in slice.by_ref().take(room) {
            let ev = item.map_err(|e| self.fell_behind(e))?;
            advanced = Some((ev.seq.saturating_add(1), ev.stream_offset()));
            batcher.push(ev);
        }

        if let Some((next, offset)) = advanced {
            self.pulled_any = true;
            self.state.set_position(next, offset);
        }

        if slice.remaining() == 0 && !self.state.live.swap(true, Ordering::AcqRel) {
            let last = self.state.cursor().and_then(|c| c.checked_sub(1));
            self.bus.publish(
                RelayEvent::new(EventKind::SessionLive)
                    .with_session(self.state.id)
                    .with_seq_opt(last),
            );
        }
        Ok(())
    }

    /// A session whose cursor got evicted from under it is too slow; one that
    /// never received anything asked for history that no longer exists.
    fn fell_behind(&self, err: RelayError) -> RelayError {
        match err {
            RelayError::CursorTooOld { .. } if self.pulled_any => RelayError::SubscriberTooSlow {
                lag: self.state.lag(self.reader.tail()),
                threshold: self.params.lag_threshold,
            },
            other => other,
        }
    }

    fn check_lag(&self) -> Option<RelayError> {
        let lag = self.state.lag(self.reader.tail());
        (lag > self.params.lag_threshold).then_some(RelayError::SubscriberTooSlow {
            lag,
            threshold: self.params.lag_threshold,
        })
    }

    fn report_exit(&self) {
        let id = self.state.id;
        let ev = match self.state.close_reason() {
            Some(reason) => match reason {
                RelayError::SubscriberTooSlow { lag, .. } => {
                    RelayEvent::new(EventKind::SessionEvicted).with_count(lag)
                }
                _ => RelayEvent::new(EventKind::SessionClosed),
            }
            .with_session(id)
            .with_reason(reason.to_string()),
            None => RelayEvent::new(EventKind::SessionClosed).with_session(id),
        };
        self.bus.publish(ev.with_seq_opt(self.state.cursor()));
    }
}

/// Downstream end of a session.
///
/// Yields batches in strictly ascending sequence order. Once the session is
/// closed for a reason (eviction, failure) the reason is returned once and the
/// subscription is finished. Dropping it unsubscribes.
pub struct Subscription {
    state: Arc<SessionState>,
    finished: bool,
}

impl Subscription {
    pub(crate) fn new(state: Arc<SessionState>) -> Self {
        Self {
            state,
            finished: false,
        }
    }

    /// Session id, unique for the process lifetime.
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Current delivery phase.
    pub fn mode(&self) -> SessionMode {
        self.state.mode()
    }

    /// Waits for the next batch.
    ///
    /// Returns `None` once the session has ended without an error (shutdown,
    /// unsubscribe) and `Some(Err(_))` exactly once if it ended with one.
    /// Batches queued before a clean shutdown are still handed out.
    pub async fn next_batch(&mut self) -> Option<Result<Batch, RelayError>> {
        let state = Arc::clone(&self.state);
        loop {
            if self.finished {
                return None;
            }
            if let Some(err) = state.close_reason() {
                self.release();
                return Some(Err(err));
            }

            let filled = state.filled.notified();
            if let Some(batch) = state.take() {
                return Some(Ok(batch));
            }
            if state.is_closed() {
                let reason = state.close_reason();
                self.release();
                return reason.map(Err);
            }

            tokio::select! {
                _ = filled => {}
                _ = state.token.cancelled() => {}
            }
        }
    }

    /// Ends the session, reporting `reason` as its cause.
    ///
    /// Used by delivery code when the downstream connection fails.
    pub fn fail(mut self, reason: RelayError) {
        self.state.close(reason);
        self.release();
    }

    fn release(&mut self) {
        self.finished = true;
        self.state.cancel();
        self.state.release_outbox();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.state.id)
            .field("cursor", &self.state.cursor())
            .field("mode", &self.state.mode())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferWriter, CommitEvent, split};

    fn params(max: usize, threshold: u64) -> SessionParams {
        SessionParams {
            batch_delay: Duration::from_millis(10),
            batch_max_events: max,
            lag_threshold: threshold,
        }
    }

    fn start(
        reader: &BufferReader,
        cursor: Option<u64>,
        params: SessionParams,
        queue: usize,
    ) -> (Subscription, tokio::task::JoinHandle<()>) {
        let state = Arc::new(SessionState::new(
            1,
            cursor.map(|c| (c, reader.offset_before(c))),
            queue,
            CancellationToken::new(),
        ));
        let session = Session::new(state.clone(), reader.clone(), Bus::new(16), params);
        let join = tokio::spawn(session.run());
        (Subscription::new(state), join)
    }

    fn append(w: &BufferWriter, seqs: std::ops::RangeInclusive<u64>) {
        for seq in seqs {
            w.append(CommitEvent::new(seq, "p")).unwrap();
        }
    }

    async fn collect(sub: &mut Subscription, upto: u64) -> Vec<u64> {
        let mut out = Vec::new();
        while out.last().copied() != Some(upto) {
            let batch = sub.next_batch().await.unwrap().unwrap();
            out.extend(batch.iter().map(|e| e.seq));
        }
        out
    }

    #[test]
    fn test_lag_counts_unpulled_events() {
        let state = SessionState::new(1, Some((5, 0)), 1, CancellationToken::new());
        assert_eq!(state.lag(Some(4)), 0);
        assert_eq!(state.lag(Some(9)), 5);
        assert_eq!(state.lag(None), 0);

        let fresh = SessionState::new(2, None, 1, CancellationToken::new());
        assert_eq!(fresh.lag(Some(100)), 0);
        assert_eq!(fresh.lag_bytes(100), 0);
    }

    #[test]
    fn test_first_close_reason_wins() {
        let state = SessionState::new(1, None, 1, CancellationToken::new());
        state.close(RelayError::connection("reset"));
        state.close(RelayError::SubscriberTooSlow { lag: 1, threshold: 1 });
        assert_eq!(state.close_reason(), Some(RelayError::connection("reset")));
        assert!(state.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_then_live_in_order() {
        let (w, r) = split(100);
        append(&w, 1..=5);
        let (mut sub, _join) = start(&r, Some(2), params(3, 100), 4);

        assert_eq!(collect(&mut sub, 5).await, vec![2, 3, 4, 5]);
        append(&w, 6..=8);
        assert_eq!(collect(&mut sub, 8).await, vec![6, 7, 8]);
        assert_eq!(sub.mode(), SessionMode::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninitialized_session_starts_at_first_append() {
        let (w, r) = split(10);
        let (mut sub, _join) = start(&r, None, params(8, 10), 4);
        tokio::task::yield_now().await;

        append(&w, 40..=42);
        assert_eq!(collect(&mut sub, 42).await, vec![40, 41, 42]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_subscriber_is_evicted() {
        let (w, r) = split(20);
        let (mut sub, join) = start(&r, None, params(1, 5), 1);
        append(&w, 1..=1);
        assert_eq!(collect(&mut sub, 1).await, vec![1]);

        append(&w, 2..=12);
        join.await.unwrap();

        match sub.next_batch().await {
            Some(Err(RelayError::SubscriberTooSlow { threshold: 5, lag })) => assert!(lag > 5),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(sub.next_batch().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_releases_unread_batches() {
        let (w, r) = split(100);
        let (sub, join) = start(&r, None, params(1, 10), 4);
        tokio::task::yield_now().await;

        append(&w, 1..=4);
        while sub.state.queued() < 4 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let first = r.get(1).unwrap();
        assert_eq!(Arc::strong_count(&first), 3);

        sub.state.close(RelayError::SubscriberTooSlow { lag: 11, threshold: 10 });
        join.await.unwrap();
        assert_eq!(sub.state.queued(), 0);
        assert_eq!(Arc::strong_count(&first), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_close_hands_out_queued_batches() {
        let (w, r) = split(10);
        let (mut sub, join) = start(&r, None, params(2, 10), 4);
        tokio::task::yield_now().await;

        append(&w, 1..=2);
        while sub.state.queued() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        sub.state.cancel();
        join.await.unwrap();

        let batch = sub.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert!(sub.next_batch().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_session() {
        let (w, r) = split(10);
        append(&w, 1..=3);
        let (sub, join) = start(&r, Some(1), params(8, 10), 1);
        drop(sub);
        join.await.unwrap();
    }
}
