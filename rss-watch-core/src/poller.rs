use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::WatchConfig;
use crate::dispatcher::Dispatcher;
use crate::error::WatchError;
use crate::events::EventBus;
use crate::feed::FeedSource;
use crate::freshness::FreshnessStore;
use crate::ingest::Ingestor;
use crate::policy::ErrorPolicy;
use crate::scanner::Scanner;
use crate::storage::KvStore;

/// The assembled pipeline, ready to be spawned.
///
/// Subscribe extra consumers through [`Watchdog::bus`] before calling
/// [`Watchdog::spawn`].
pub struct Watchdog {
    config: WatchConfig,
    bus: Arc<EventBus>,
    store: FreshnessStore,
    source: Arc<dyn FeedSource>,
    policy: ErrorPolicy,
}

impl Watchdog {
    pub fn new(config: WatchConfig, kv: Arc<dyn KvStore>, source: Arc<dyn FeedSource>) -> Self {
        let bus = Arc::new(EventBus::new());
        let policy = ErrorPolicy::new(config.exit_on_error);
        policy.attach(&bus);
        let store = FreshnessStore::new(kv);
        store.attach(&bus, config.old_feed_threshold());
        Self {
            config,
            bus,
            store,
            source,
            policy,
        }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn store(&self) -> &FreshnessStore {
        &self.store
    }

    pub fn spawn(self) -> PollerHandle {
        let (cancel_tx, _) = broadcast::channel(1);

        let ingestor = Arc::new(Ingestor::new(
            Arc::clone(&self.bus),
            self.store.clone(),
            self.source,
            self.policy.clone(),
        ));
        let dispatcher = Dispatcher::new(ingestor, self.config.dispatch_limits())
            .attach(&self.bus, cancel_tx.subscribe());

        let scanner = Scanner::new(
            self.bus,
            self.store,
            self.config.feeds.clone(),
            self.policy.clone(),
        );
        let scanner = tokio::spawn(run_scanner(
            scanner,
            self.config.monitor_frequency(),
            self.policy,
            cancel_tx.subscribe(),
        ));

        PollerHandle {
            cancel_tx,
            scanner,
            dispatcher,
        }
    }
}

async fn run_scanner(
    scanner: Scanner,
    frequency: Duration,
    policy: ErrorPolicy,
    mut cancel_rx: broadcast::Receiver<()>,
) -> Result<(), WatchError> {
    let mut halt_rx = policy.subscribe_halt();
    loop {
        policy.check()?;
        scanner.scan_once()?;

        tokio::select! {
            _ = cancel_rx.recv() => {
                info!("poller shutdown requested");
                return Ok(());
            }
            _ = halt_rx.changed() => {}
            _ = tokio::time::sleep(frequency) => {}
        }
    }
}

pub struct PollerHandle {
    cancel_tx: broadcast::Sender<()>,
    scanner: JoinHandle<Result<(), WatchError>>,
    dispatcher: JoinHandle<()>,
}

impl PollerHandle {
    /// Stops scanning, then aborts and reaps every ingestion still running.
    /// No event is published once this returns.
    pub async fn stop(self) -> Result<(), WatchError> {
        let _ = self.cancel_tx.send(());
        let scanned = self.scanner.await;
        self.dispatcher.await?;
        scanned?
    }

    /// Runs until the scanner halts on its own or `shutdown` resolves.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<(), WatchError> {
        let finished = tokio::select! {
            result = &mut self.scanner => Some(result),
            _ = shutdown => None,
        };
        match finished {
            Some(result) => {
                let _ = self.cancel_tx.send(());
                self.dispatcher.await?;
                result?
            }
            None => self.stop().await,
        }
    }
}
