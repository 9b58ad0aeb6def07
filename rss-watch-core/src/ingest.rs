use std::sync::Arc;

use tracing::{debug, info};

use crate::error::WatchError;
use crate::events::{EntryDiscovered, EventBus, FeedParsed};
use crate::feed::{Entry, FeedSource};
use crate::freshness::FreshnessStore;
use crate::policy::ErrorPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Parsed { fetched: usize, discovered: usize },
    FetchFailed,
}

/// Fetches a feed and publishes the entries the store has not seen yet.
pub struct Ingestor {
    bus: Arc<EventBus>,
    store: FreshnessStore,
    source: Arc<dyn FeedSource>,
    policy: ErrorPolicy,
}

impl Ingestor {
    pub fn new(
        bus: Arc<EventBus>,
        store: FreshnessStore,
        source: Arc<dyn FeedSource>,
        policy: ErrorPolicy,
    ) -> Self {
        Self {
            bus,
            store,
            source,
            policy,
        }
    }

    pub fn policy(&self) -> &ErrorPolicy {
        &self.policy
    }

    /// Reports `err` through the error policy.
    pub fn report(&self, err: WatchError) -> Result<(), WatchError> {
        self.policy.report(&self.bus, err)
    }

    /// Every `EntryDiscovered` for this fetch is published before its
    /// `FeedParsed`. A fetch failure publishes neither, leaving the feed stale.
    ///
    /// Only [`WatchError::Halted`] is returned; other errors are reported on
    /// the bus and the ingestion carries on or is abandoned.
    pub async fn ingest(&self, feed: &str) -> Result<IngestOutcome, WatchError> {
        let items = match self.source.fetch(feed).await {
            Ok(items) => items,
            Err(source) => {
                self.report(WatchError::Fetch {
                    feed: feed.to_owned(),
                    source,
                })?;
                return Ok(IngestOutcome::FetchFailed);
            }
        };

        let fetched = items.len();
        let mut discovered = 0;
        for item in items {
            let entry = Entry::from_item(feed, item);
            match self.store.is_known(&entry.id) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    // skipped rather than risk announcing it twice
                    self.report(err)?;
                    continue;
                }
            }

            self.bus.publish::<EntryDiscovered>(&entry);
            discovered += 1;
            if let Err(err) = self.store.persist_entry(&entry) {
                self.report(err)?;
            }
        }

        self.bus.publish::<FeedParsed>(feed);
        if discovered > 0 {
            info!(feed, fetched, discovered, "feed ingested");
        } else {
            debug!(feed, fetched, "feed ingested, nothing new");
        }
        Ok(IngestOutcome::Parsed {
            fetched,
            discovered,
        })
    }
}
