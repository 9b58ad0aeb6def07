pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod feed;
pub mod freshness;
pub mod ingest;
pub mod logger;
pub mod policy;
pub mod poller;
pub mod scanner;
pub mod storage;

pub use config::{Throttling, WatchConfig};
pub use dispatcher::{DispatchLimits, Dispatcher};
pub use error::{ConfigError, FetchError, StoreError, WatchError};
pub use events::{EntryDiscovered, ErrorReported, EventBus, FeedParsed, FeedStale, ScanStarted, Topic};
pub use feed::{parse_feed, Entry, FeedItem, FeedSource, HttpFeedSource};
pub use freshness::FreshnessStore;
pub use ingest::{IngestOutcome, Ingestor};
pub use policy::ErrorPolicy;
pub use poller::{PollerHandle, Watchdog};
pub use scanner::{ScanReport, Scanner};
pub use storage::{FileStore, KvStore};
