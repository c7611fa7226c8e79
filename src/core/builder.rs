use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{
    dispatcher::Dispatcher,
    ingestor::IngestState,
    relay::{Relay, RelayHandle},
};
use crate::{
    admin::ReadyGate, buffer, config::Config, error::ConfigError, events::Bus,
    observers::Observe, upstream::UpstreamRef,
};

/// Builder for constructing a [`Relay`].
pub struct RelayBuilder {
    cfg: Config,
    observers: Vec<Arc<dyn Observe>>,
    handle_signals: bool,
}

impl RelayBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            observers: Vec::new(),
            handle_signals: true,
        }
    }

    /// Sets event observers, replacing any added before.
    ///
    /// Observers receive relay events (ingest state, gaps, sessions, shutdown)
    /// through dedicated workers with bounded queues.
    pub fn with_observers(mut self, observers: Vec<Arc<dyn Observe>>) -> Self {
        self.observers = observers;
        self
    }

    /// Adds one observer.
    pub fn with_observer(mut self, observer: Arc<dyn Observe>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Whether [`Relay::run`] listens for OS termination signals (default `true`).
    ///
    /// Embedders that drive shutdown themselves turn this off and call
    /// [`RelayHandle::shutdown`].
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Validates the configuration and wires every component around `upstream`.
    ///
    /// Nothing is spawned until [`Relay::run`]; subscribing through the
    /// returned relay's handle is possible right away.
    pub fn build(self, upstream: UpstreamRef) -> Result<Relay, ConfigError> {
        self.cfg.validate()?;
        let cfg = Arc::new(self.cfg);

        let bus = Bus::new(cfg.bus_capacity_clamped());
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (writer, reader) = buffer::split(cfg.window_capacity);
        let (ingest_tx, ingest_rx) = watch::channel(IngestState::Disconnected);

        let dispatcher = Dispatcher::new(
            reader.clone(),
            &cfg,
            bus.clone(),
            tracker.clone(),
            token.clone(),
        );

        let handle = RelayHandle {
            reader,
            dispatcher,
            ready: Arc::new(ReadyGate::new(cfg.min_ready_events)),
            ingest: ingest_rx,
            bus: bus.clone(),
            token,
        };

        Ok(Relay {
            cfg,
            bus,
            upstream,
            observers: self.observers,
            handle_signals: self.handle_signals,
            writer,
            ingest_tx,
            tracker,
            handle,
        })
    }
}
