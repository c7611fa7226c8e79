//! # Example: relay_demo
//!
//! Minimal relay: a synthetic upstream, one live subscriber and one replaying
//! subscriber, then a graceful shutdown.
//!
//! Demonstrates how to:
//! - Wrap an async closure as an upstream with [`UpstreamFn`].
//! - Build and run a [`Relay`] without OS signal handling.
//! - Subscribe live (`None`) and from a cursor (`Some(seq)`).
//! - Read [`RelayHandle::stats`] before shutting down.
//!
//! ## Flow
//! ```text
//! UpstreamFn ──► Ingestor ──► EventBuffer (window of 32)
//!                                 ├─► Session(live)   ──► Subscription::next_batch()
//!                                 └─► Session(replay) ──► Subscription::next_batch()
//! RelayHandle::shutdown() ──► sessions end ──► Relay::run() returns
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example relay_demo
//! ```

use std::time::Duration;

use futures::StreamExt;
use commit_relay::{Config, Relay, RelayError, Subscription, UpstreamFn, UpstreamRecord};

const LAST: u64 = 50;

/// Reads until `LAST` has been delivered, printing each batch.
async fn drain(label: &str, mut sub: Subscription) -> Result<(), RelayError> {
    while let Some(batch) = sub.next_batch().await {
        let batch = batch?;
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            continue;
        };
        println!("[{label}] batch {}..={} ({} events)", first.seq, last.seq, batch.len());
        if last.seq >= LAST {
            break;
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Small window so the replay cursor has something to fall out of
    let mut cfg = Config::default();
    cfg.window_capacity = 32;
    cfg.lag_threshold = 32;
    cfg.batch_delay = Duration::from_millis(20);

    // 2. Upstream: one commit every 10ms, resuming after the last good seq
    let upstream = UpstreamFn::arc("ticker", |last_good: Option<u64>| async move {
        let start = last_good.map_or(1, |s| s + 1);
        let commits = futures::stream::iter(start..=LAST)
            .then(|seq| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(UpstreamRecord::new(seq, format!("commit {seq}")))
            })
            .chain(futures::stream::pending());
        Ok::<_, RelayError>(commits.boxed())
    });

    // 3. Build and start the relay
    let relay = Relay::builder(cfg).handle_signals(false).build(upstream)?;
    let handle = relay.handle();
    let running = tokio::spawn(relay.run());

    // 4. Live subscriber from the next commit on
    let live = tokio::spawn(drain("live", handle.subscribe(None)?));

    // 5. Replay subscriber once a few commits are retained
    let mut tail = handle.buffer().watch_tail();
    tail.wait_for(|t| t.is_some_and(|t| t >= 10)).await?;
    let head = handle.buffer().head().unwrap_or(1);
    println!("[main] replaying from head={head}");
    let replay = tokio::spawn(drain("replay", handle.subscribe(Some(head))?));

    live.await??;
    replay.await??;

    // 6. Inspect and stop
    println!("[main] stats: {}", handle.stats().to_json()?);
    handle.shutdown();
    running.await??;

    println!("finished");
    Ok(())
}
