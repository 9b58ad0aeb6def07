use std::sync::Arc;

use tracing::debug;

use crate::error::WatchError;
use crate::events::{EventBus, FeedStale, ScanStarted};
use crate::freshness::FreshnessStore;
use crate::policy::ErrorPolicy;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub checked: usize,
    pub stale: usize,
    pub failed: usize,
}

pub struct Scanner {
    bus: Arc<EventBus>,
    store: FreshnessStore,
    feeds: Vec<String>,
    policy: ErrorPolicy,
}

impl Scanner {
    pub fn new(
        bus: Arc<EventBus>,
        store: FreshnessStore,
        feeds: Vec<String>,
        policy: ErrorPolicy,
    ) -> Self {
        Self {
            bus,
            store,
            feeds,
            policy,
        }
    }

    /// Walks the feed list once, in order, publishing `FeedStale` for every
    /// feed without a freshness marker. Fetches triggered by those events are
    /// not awaited.
    pub fn scan_once(&self) -> Result<ScanReport, WatchError> {
        self.bus.publish::<ScanStarted>(&());
        let mut report = ScanReport::default();
        for feed in &self.feeds {
            report.checked += 1;
            match self.store.has_marker(feed) {
                Ok(true) => {}
                Ok(false) => {
                    report.stale += 1;
                    self.bus.publish::<FeedStale>(feed);
                }
                Err(err) => {
                    report.failed += 1;
                    self.policy.report(&self.bus, err)?;
                }
            }
        }
        debug!(
            checked = report.checked,
            stale = report.stale,
            failed = report.failed,
            "scan cycle finished"
        );
        Ok(report)
    }
}
