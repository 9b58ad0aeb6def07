use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::WatchError;
use crate::events::{EventBus, FeedParsed};
use crate::feed::Entry;
use crate::storage::KvStore;

/// Freshness markers and persisted entries on top of a [`KvStore`].
///
/// A feed is stale exactly when no marker is stored under its URL.
#[derive(Clone)]
pub struct FreshnessStore {
    kv: Arc<dyn KvStore>,
}

impl FreshnessStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn has_marker(&self, feed: &str) -> Result<bool, WatchError> {
        self.kv
            .get(feed)
            .map(|value| value.is_some())
            .map_err(|source| WatchError::store(feed, source))
    }

    pub fn refresh_marker(&self, feed: &str, ttl: Duration) -> Result<(), WatchError> {
        self.kv
            .set_ex(feed, feed, ttl)
            .map_err(|source| WatchError::store(feed, source))?;
        debug!(feed, ttl_secs = ttl.as_secs(), "freshness marker refreshed");
        Ok(())
    }

    pub fn is_known(&self, id: &str) -> Result<bool, WatchError> {
        self.kv
            .get(id)
            .map(|value| value.is_some())
            .map_err(|source| WatchError::store(id, source))
    }

    pub fn persist_entry(&self, entry: &Entry) -> Result<(), WatchError> {
        let value = serde_json::to_string(entry).map_err(|source| WatchError::Serialization {
            entry: entry.id.clone(),
            source,
        })?;
        self.kv
            .set(&entry.id, &value)
            .map_err(|source| WatchError::store(&entry.id, source))
    }

    pub fn load_entry(&self, id: &str) -> Result<Option<Entry>, WatchError> {
        let Some(value) = self
            .kv
            .get(id)
            .map_err(|source| WatchError::store(id, source))?
        else {
            return Ok(None);
        };
        serde_json::from_str(&value)
            .map(Some)
            .map_err(|source| WatchError::Serialization {
                entry: id.to_owned(),
                source,
            })
    }

    /// Refreshes a feed's marker every time it is parsed.
    pub fn attach(&self, bus: &EventBus, ttl: Duration) {
        let store = self.clone();
        bus.subscribe::<FeedParsed>(move |feed: &str| store.refresh_marker(feed, ttl));
    }
}
