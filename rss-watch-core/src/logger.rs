use tracing::{debug, error, info};

use crate::error::WatchError;
use crate::events::{EntryDiscovered, ErrorReported, EventBus, FeedParsed, FeedStale, ScanStarted};
use crate::feed::Entry;

/// Logs every pipeline event through `tracing`.
pub fn attach(bus: &EventBus) {
    bus.subscribe::<ScanStarted>(|_: &()| {
        info!("checking for out of date feeds");
        Ok(())
    });
    bus.subscribe::<FeedStale>(|feed: &str| {
        info!(feed, "needs checking");
        Ok(())
    });
    bus.subscribe::<EntryDiscovered>(|entry: &Entry| {
        info!(feed = %entry.feed, id = %entry.id, title = %entry.title, "new entry");
        Ok(())
    });
    bus.subscribe::<FeedParsed>(|feed: &str| {
        debug!(feed, "feed parsed");
        Ok(())
    });
    bus.subscribe::<ErrorReported>(|err: &WatchError| {
        error!(error = %err, "watchdog error");
        Ok(())
    });
}
