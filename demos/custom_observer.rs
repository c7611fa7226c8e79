//! # Example: custom_observer
//!
//! Demonstrates how to build and attach a custom relay observer.
//!
//! Shows how to:
//! - Implement the [`Observe`] trait.
//! - Inspect [`RelayEvent`] / [`EventKind`] for upstream and session lifecycle.
//! - Wire the observer in with [`RelayBuilder::with_observer`].
//!
//! The upstream drops its connection once and skips a sequence number, so the
//! observer sees a reconnect and a gap resync. A subscriber that never reads
//! is evicted for lagging.
//!
//! ## Flow
//! ```text
//! UpstreamFn ──► Ingestor ──► publish(UpstreamConnected / GapDetected / ReconnectScheduled)
//! Monitor    ──► publish(SessionEvicted)
//! Bus ──► observer listener (in Relay::run) ──► ObserverSet ──► ConsoleObserver.on_event()
//! ```
//!
//! ## Run
//! Uses the default `logging` feature for [`init_tracing`].
//! ```bash
//! RELAY_LOG=debug cargo run --example custom_observer
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::StreamExt;
use commit_relay::{
    Config, EventKind, Observe, Relay, RelayError, RelayEvent, UpstreamFn, UpstreamRecord,
    init_tracing,
};

/// Prints the events an operator would page on and ignores the rest.
struct ConsoleObserver;

#[async_trait::async_trait]
impl Observe for ConsoleObserver {
    async fn on_event(&self, ev: &RelayEvent) {
        match ev.kind {
            // === Ingest ===
            EventKind::UpstreamConnected => {
                println!("[obs] connected:    resume_after={:?}", ev.seq);
            }
            EventKind::UpstreamDisconnected => {
                println!(
                    "[obs] disconnected: last_good={:?} reason={}",
                    ev.seq,
                    ev.reason.as_deref().unwrap_or("<none>")
                );
            }
            EventKind::ReconnectScheduled => {
                println!(
                    "[obs] reconnect:    attempt={} delay={}ms",
                    ev.attempt.unwrap_or(0),
                    ev.delay_ms.unwrap_or(0)
                );
            }
            EventKind::GapDetected => {
                println!("[obs] gap:          at={:?} missing={:?}", ev.seq, ev.count);
            }

            // === Sessions ===
            EventKind::SessionEvicted => {
                println!(
                    "[obs] evicted:      session={:?} reason={}",
                    ev.session,
                    ev.reason.as_deref().unwrap_or("<none>")
                );
            }

            // === Shutdown ===
            EventKind::ShutdownRequested => println!("[obs] shutdown requested"),
            EventKind::AllStoppedWithin => println!("[obs] all stopped within grace"),
            EventKind::GraceExceeded => println!("[obs] grace exceeded"),

            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "console"
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut cfg = Config::default();
    cfg.window_capacity = 16;
    cfg.lag_threshold = 8;
    cfg.session_queue_capacity = 1;
    cfg.batch_max_events = 1;
    cfg.monitor_interval = Duration::from_millis(20);
    cfg.backoff.first = Duration::from_millis(50);

    // First connection: 1..=5 then 7 (gap), second: resumes cleanly up to 40.
    let attempts = Arc::new(AtomicU32::new(0));
    let upstream = UpstreamFn::arc("flaky", move |last_good: Option<u64>| {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed);
        async move {
            let seqs: Vec<u64> = match attempt {
                0 => vec![1, 2, 3, 4, 5, 7],
                _ => (last_good.map_or(1, |s| s + 1)..=40).collect(),
            };
            let commits = futures::stream::iter(seqs)
                .then(|seq| async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(UpstreamRecord::new(seq, format!("commit {seq}")))
                })
                .chain(futures::stream::pending());
            Ok::<_, RelayError>(commits.boxed())
        }
    });

    let relay = Relay::builder(cfg)
        .handle_signals(false)
        .with_observer(Arc::new(ConsoleObserver))
        .build(upstream)?;
    let handle = relay.handle();
    let running = tokio::spawn(relay.run());

    // Never read: lag grows past the threshold and the monitor evicts it.
    let idle = handle.subscribe(None)?;

    let mut tail = handle.buffer().watch_tail();
    tail.wait_for(|t| *t == Some(40)).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    drop(idle);
    handle.shutdown();
    running.await??;

    println!("\nfinished");
    Ok(())
}
