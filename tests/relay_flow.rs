use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use commit_relay::{
    Config, EventKind, IngestState, JitterPolicy, Observe, RecordStream, Relay, RelayError,
    RelayEvent, RelayHandle, RuntimeError, Subscription, UpstreamFn, UpstreamRecord, UpstreamRef,
};

const WAIT: Duration = Duration::from_secs(5);

fn cfg(window: usize, threshold: u64) -> Config {
    let mut cfg = Config {
        window_capacity: window,
        lag_threshold: threshold,
        batch_delay: Duration::from_millis(1),
        batch_max_events: 16,
        monitor_interval: Duration::from_millis(10),
        grace: Duration::from_secs(2),
        ..Config::default()
    };
    cfg.backoff.first = Duration::from_millis(1);
    cfg.backoff.max = Duration::from_millis(20);
    cfg.backoff.jitter = JitterPolicy::None;
    cfg
}

/// Upstream that plays one script per connect attempt, then stays open idle.
fn scripted(scripts: Vec<Vec<Result<u64, &'static str>>>) -> (UpstreamRef, Arc<Mutex<Vec<Option<u64>>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    let scripts = Arc::new(scripts);
    let up: UpstreamRef = UpstreamFn::arc("scripted", move |last_good: Option<u64>| {
        let attempt = {
            let mut c = seen.lock();
            c.push(last_good);
            c.len() - 1
        };
        let script = scripts.get(attempt).cloned();
        async move {
            let stream: RecordStream = match script {
                Some(items) => futures::stream::iter(items.into_iter().map(|item| {
                    item.map(|s| UpstreamRecord::new(s, format!("commit-{s}")))
                        .map_err(RelayError::upstream)
                }))
                .chain(futures::stream::pending())
                .boxed(),
                None => futures::stream::pending().boxed(),
            };
            Ok::<_, RelayError>(stream)
        }
    });
    (up, calls)
}

/// Upstream fed by the test through a channel; one connection only.
fn channel_upstream() -> (UpstreamRef, mpsc::UnboundedSender<u64>) {
    let (tx, rx) = mpsc::unbounded_channel::<u64>();
    let rx = Arc::new(Mutex::new(Some(rx)));
    let up: UpstreamRef = UpstreamFn::arc("channel", move |_last: Option<u64>| {
        let rx = rx.lock().take();
        async move {
            let stream: RecordStream = match rx {
                Some(rx) => futures::stream::unfold(rx, |mut rx| async move {
                    match rx.recv().await {
                        Some(seq) => Some((Ok(UpstreamRecord::new(seq, vec![0u8; 8])), rx)),
                        None => None,
                    }
                })
                .chain(futures::stream::pending())
                .boxed(),
                None => futures::stream::pending().boxed(),
            };
            Ok::<_, RelayError>(stream)
        }
    });
    (up, tx)
}

fn start(cfg: Config, upstream: UpstreamRef) -> (RelayHandle, JoinHandle<Result<(), RuntimeError>>) {
    let relay = Relay::builder(cfg)
        .handle_signals(false)
        .build(upstream)
        .unwrap();
    let handle = relay.handle();
    (handle, tokio::spawn(relay.run()))
}

async fn collect_until(sub: &mut Subscription, last: u64) -> Vec<u64> {
    let mut out = Vec::new();
    while out.last().copied() != Some(last) {
        let batch = timeout(WAIT, sub.next_batch())
            .await
            .expect("timed out waiting for batch")
            .expect("session ended")
            .expect("session failed");
        out.extend(batch.iter().map(|e| e.seq));
    }
    out
}

async fn wait_tail(handle: &RelayHandle, seq: u64) {
    let mut rx = handle.buffer().watch_tail();
    timeout(WAIT, rx.wait_for(|t| *t == Some(seq)))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_subscribers_receive_every_event_once_in_order() {
    let (up, tx) = channel_upstream();
    let (handle, run) = start(cfg(1_000, 1_000), up);

    let mut early_a = handle.subscribe(None).unwrap();
    let mut early_b = handle.subscribe(None).unwrap();

    for seq in 1..=200 {
        tx.send(seq).unwrap();
    }
    wait_tail(&handle, 200).await;

    let mut replay = handle.subscribe(Some(1)).unwrap();
    let mut tail_only = handle.subscribe(None).unwrap();

    for seq in 201..=500 {
        tx.send(seq).unwrap();
    }

    let expected: Vec<u64> = (1..=500).collect();
    assert_eq!(collect_until(&mut early_a, 500).await, expected);
    assert_eq!(collect_until(&mut early_b, 500).await, expected);
    assert_eq!(collect_until(&mut replay, 500).await, expected);
    assert_eq!(collect_until(&mut tail_only, 500).await, (201..=500).collect::<Vec<_>>());

    handle.shutdown();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_gap_resync_and_cursor_too_old() {
    let (up, calls) = scripted(vec![
        vec![Ok(1), Ok(2), Ok(3), Ok(4), Ok(5), Ok(7)],
        vec![Ok(4), Ok(5), Ok(6), Ok(7)],
    ]);
    let (handle, run) = start(cfg(5, 5), up);
    let mut events = handle.events();

    wait_tail(&handle, 7).await;
    let stats = handle.stats();
    assert_eq!(stats.head, Some(3));
    assert_eq!(stats.tail, Some(7));
    assert_eq!(stats.occupancy, 5);
    assert_eq!(stats.total_received, 7);
    assert_eq!(*calls.lock(), vec![None, Some(5)]);

    let mut saw_gap = false;
    while let Ok(ev) = events.try_recv() {
        if ev.kind == EventKind::GapDetected {
            assert_eq!(ev.seq, Some(6));
            assert_eq!(ev.count, Some(1));
            saw_gap = true;
        }
    }
    assert!(saw_gap);

    assert_eq!(
        handle.subscribe(Some(2)).unwrap_err(),
        RelayError::CursorTooOld { cursor: 2, head: 3 }
    );
    let mut sub = handle.subscribe(Some(3)).unwrap();
    assert_eq!(collect_until(&mut sub, 7).await, vec![3, 4, 5, 6, 7]);

    handle.shutdown();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reconnect_resumes_without_duplicates() {
    let (up, calls) = scripted(vec![
        vec![Ok(1), Ok(2), Ok(3), Err("connection reset")],
        vec![Ok(2), Ok(3), Ok(4), Ok(5), Ok(6)],
    ]);
    let (handle, run) = start(cfg(100, 100), up);
    let mut events = handle.events();
    let mut sub = handle.subscribe(None).unwrap();

    assert_eq!(collect_until(&mut sub, 6).await, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(*calls.lock(), vec![None, Some(3)]);
    assert_eq!(handle.ingest_state(), IngestState::Streaming);

    let mut reconnect = None;
    while let Ok(ev) = events.try_recv() {
        if ev.kind == EventKind::ReconnectScheduled {
            reconnect = Some(ev);
        }
    }
    let reconnect = reconnect.expect("reconnect reported");
    assert_eq!(reconnect.attempt, Some(1));
    assert!(reconnect.reason.as_deref().unwrap().contains("connection reset"));

    handle.shutdown();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_slow_subscriber_is_evicted_without_affecting_others() {
    let mut config = cfg(100, 10);
    config.batch_max_events = 1;
    config.session_queue_capacity = 1;
    let (up, tx) = channel_upstream();
    let (handle, run) = start(config, up);

    let mut slow = handle.subscribe(None).unwrap();
    let mut fast = handle.subscribe(None).unwrap();
    let slow_id = slow.id();

    let reader = tokio::spawn(async move { collect_until(&mut fast, 60).await });
    for seq in 1..=60 {
        tx.send(seq).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(reader.await.unwrap(), (1..=60).collect::<Vec<_>>());

    let err = loop {
        match timeout(WAIT, slow.next_batch()).await.unwrap() {
            Some(Ok(_)) => continue,
            Some(Err(e)) => break e,
            None => panic!("session ended without a reason"),
        }
    };
    assert!(matches!(err, RelayError::SubscriberTooSlow { threshold: 10, .. }));
    assert!(slow.next_batch().await.is_none());

    timeout(WAIT, async {
        while handle.stats().sessions.iter().any(|s| s.id == slow_id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    handle.shutdown();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_readiness_waits_for_priming() {
    let mut config = cfg(100, 100);
    config.min_ready_events = 3;
    let (up, tx) = channel_upstream();
    let (handle, run) = start(config, up);

    assert!(!handle.is_ready());
    assert_eq!(handle.stats().not_ready_reason, Some(commit_relay::WARMUP_PENDING_REASON));

    tx.send(1).unwrap();
    tx.send(2).unwrap();
    wait_tail(&handle, 2).await;
    assert!(!handle.is_ready());

    tx.send(3).unwrap();
    timeout(WAIT, handle.ready()).await.unwrap();
    let stats = handle.stats();
    assert!(stats.ready);
    assert_eq!(stats.not_ready_reason, None);
    assert!(stats.to_json().unwrap().contains("\"ready\":true"));

    handle.shutdown();
    run.await.unwrap().unwrap();
}

#[derive(Default)]
struct Recorder(Mutex<Vec<EventKind>>);

#[async_trait]
impl Observe for Recorder {
    async fn on_event(&self, event: &RelayEvent) {
        self.0.lock().push(event.kind);
    }
    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[tokio::test]
async fn test_shutdown_ends_sessions_and_reaches_observers() {
    let recorder = Arc::new(Recorder::default());
    let (up, tx) = channel_upstream();
    let relay = Relay::builder(cfg(10, 10))
        .handle_signals(false)
        .with_observer(recorder.clone())
        .build(up)
        .unwrap();
    let handle = relay.handle();
    let run = tokio::spawn(relay.run());

    let mut sub = handle.subscribe(None).unwrap();
    timeout(WAIT, handle.connected()).await.unwrap();
    tx.send(1).unwrap();
    assert_eq!(collect_until(&mut sub, 1).await, vec![1]);

    handle.shutdown();
    assert!(timeout(WAIT, sub.next_batch()).await.unwrap().is_none());
    run.await.unwrap().unwrap();
    assert!(handle.is_shutting_down());
    assert_eq!(handle.session_count(), 0);
    assert!(matches!(
        handle.subscribe(None),
        Err(RelayError::ConnectionFailure { .. })
    ));

    let kinds = recorder.0.lock().clone();
    for kind in [
        EventKind::UpstreamConnected,
        EventKind::SessionOpened,
        EventKind::SessionLive,
        EventKind::ShutdownRequested,
        EventKind::SessionClosed,
        EventKind::AllStoppedWithin,
    ] {
        assert!(kinds.contains(&kind), "missing {kind:?} in {kinds:?}");
    }
}

#[tokio::test]
async fn test_unsubscribe_releases_session() {
    let (up, _tx) = channel_upstream();
    let (handle, run) = start(cfg(10, 10), up);

    let mut sub = handle.subscribe(None).unwrap();
    assert_eq!(handle.session_count(), 1);
    assert!(handle.unsubscribe(sub.id()));
    assert!(timeout(WAIT, sub.next_batch()).await.unwrap().is_none());

    timeout(WAIT, async {
        while handle.session_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    handle.shutdown();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_replay_from_head_of_full_default_window() {
    let defaults = Config::default();
    let window = defaults.window_capacity as u64;
    let mut config = cfg(defaults.window_capacity, defaults.lag_threshold);
    config.batch_max_events = defaults.batch_max_events;
    let (up, tx) = channel_upstream();
    let (handle, run) = start(config, up);

    for seq in 1..=window {
        tx.send(seq).unwrap();
    }
    wait_tail(&handle, window).await;
    assert_eq!(handle.buffer().head(), Some(1));

    let mut sub = handle.subscribe(Some(1)).unwrap();
    let got = collect_until(&mut sub, window).await;
    assert_eq!(got.len() as u64, window);
    assert!(got.iter().copied().eq(1..=window));

    handle.shutdown();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_head_replay_races_a_wrapping_window() {
    const WINDOW: u64 = 64;
    const LAST: u64 = 400;

    let (up, tx) = channel_upstream();
    let (handle, run) = start(cfg(WINDOW as usize, WINDOW), up);

    for seq in 1..=WINDOW {
        tx.send(seq).unwrap();
    }
    wait_tail(&handle, WINDOW).await;

    let mut sub = handle.subscribe(Some(1)).unwrap();
    let reader = tokio::spawn(async move {
        let mut seen = Vec::new();
        loop {
            match timeout(WAIT, sub.next_batch()).await.expect("timed out") {
                Some(Ok(batch)) => {
                    seen.extend(batch.iter().map(|e| e.seq));
                    if seen.last() == Some(&LAST) {
                        return (seen, None);
                    }
                }
                Some(Err(e)) => return (seen, Some(e)),
                None => panic!("session ended without a reason"),
            }
        }
    });

    for seq in WINDOW + 1..=LAST {
        tx.send(seq).unwrap();
        if seq % 8 == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    let (seen, failure) = reader.await.unwrap();
    assert!(
        seen.iter().copied().eq(1..=seen.len() as u64),
        "gap or duplicate in {seen:?}"
    );
    match failure {
        None => assert_eq!(seen.last(), Some(&LAST)),
        Some(err) => assert!(
            matches!(
                err,
                RelayError::SubscriberTooSlow { .. } | RelayError::CursorTooOld { .. }
            ),
            "unexpected failure {err:?}"
        ),
    }

    handle.shutdown();
    run.await.unwrap().unwrap();
}
