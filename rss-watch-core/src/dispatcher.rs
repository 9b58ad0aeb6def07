use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::{FetchError, WatchError};
use crate::events::{EventBus, FeedStale};
use crate::ingest::Ingestor;

#[derive(Debug, Clone, Copy)]
pub struct DispatchLimits {
    pub max_concurrent: usize,
    pub fetch_timeout: Duration,
}

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Removes a feed from the in-flight set when its task ends, however it ends.
struct InFlightGuard {
    feed: String,
    in_flight: InFlight,
}

impl InFlightGuard {
    fn claim(in_flight: &InFlight, feed: &str) -> Option<Self> {
        let mut set = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(feed.to_owned()) {
            return None;
        }
        Some(Self {
            feed: feed.to_owned(),
            in_flight: Arc::clone(in_flight),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.feed);
    }
}

/// Runs one ingestion per stale feed, never more than `max_concurrent` at once.
///
/// The `FeedStale` handler only enqueues, so publishing never blocks; the
/// dispatch loop waits for a permit before spawning each task and the task
/// holds that permit until it finishes, fails, times out or panics.
///
/// Ingestion tasks belong to the loop. On cancellation or halt they are
/// aborted and reaped before the loop's handle resolves, so nothing is
/// published or written once it has.
pub struct Dispatcher {
    ingestor: Arc<Ingestor>,
    permits: Arc<Semaphore>,
    fetch_timeout: Duration,
    in_flight: InFlight,
}

impl Dispatcher {
    pub fn new(ingestor: Arc<Ingestor>, limits: DispatchLimits) -> Self {
        Self {
            ingestor,
            permits: Arc::new(Semaphore::new(limits.max_concurrent)),
            fetch_timeout: limits.fetch_timeout,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn attach(self, bus: &EventBus, mut cancel_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let (feed_tx, mut feed_rx) = mpsc::unbounded_channel::<String>();
        let policy = self.ingestor.policy().clone();
        bus.subscribe::<FeedStale>(move |feed: &str| match feed_tx.send(feed.to_owned()) {
            Ok(()) => Ok(()),
            // the loop has already stopped for the halt
            Err(_) if policy.halt_reason().is_some() => Ok(()),
            Err(_) => Err(WatchError::DispatcherClosed),
        });
        let mut halt_rx = self.ingestor.policy().subscribe_halt();

        tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            loop {
                if halt_rx.borrow().is_some() {
                    break;
                }
                let feed = tokio::select! {
                    _ = cancel_rx.recv() => break,
                    _ = halt_rx.changed() => continue,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        reap(joined);
                        continue;
                    }
                    next = feed_rx.recv() => match next {
                        Some(feed) => feed,
                        None => break,
                    },
                };

                let Some(guard) = InFlightGuard::claim(&self.in_flight, &feed) else {
                    debug!(feed = %feed, "feed already queued or in flight");
                    continue;
                };

                let permit = tokio::select! {
                    _ = cancel_rx.recv() => break,
                    _ = halt_rx.changed() => break,
                    permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                // a task reports before releasing its permit, so a halt it
                // caused is already visible here
                if halt_rx.borrow().is_some() {
                    break;
                }

                let ingestor = Arc::clone(&self.ingestor);
                let deadline = self.fetch_timeout;
                tasks.spawn(async move {
                    let _permit = permit;
                    let _guard = guard;
                    match tokio::time::timeout(deadline, ingestor.ingest(&feed)).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(err)) => debug!(feed = %feed, error = %err, "ingestion halted"),
                        Err(_) => {
                            warn!(feed = %feed, ?deadline, "ingestion timed out");
                            let _ = ingestor.report(WatchError::Fetch {
                                feed: feed.clone(),
                                source: FetchError::Timeout(deadline),
                            });
                        }
                    }
                });
            }

            if !tasks.is_empty() {
                info!(pending = tasks.len(), "aborting in-flight ingestions");
            }
            tasks.abort_all();
            while let Some(joined) = tasks.join_next().await {
                reap(joined);
            }
            info!("dispatcher stopped");
        })
    }
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            warn!(error = %err, "ingestion task panicked");
        }
    }
}
