#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rss_watch_core::{
    Entry, EntryDiscovered, ErrorReported, EventBus, FeedItem, FeedParsed, FeedSource, FeedStale,
    FetchError, FileStore, KvStore, ScanStarted, StoreError, WatchError,
};

pub fn item(id: &str, title: &str) -> FeedItem {
    FeedItem {
        id: id.into(),
        title: title.into(),
        date: Utc.with_ymd_and_hms(2024, 10, 21, 7, 28, 0).unwrap(),
        link: format!("http://example.com/{id}"),
    }
}

/// Feed source answering from a fixed script.
#[derive(Default)]
pub struct ScriptedSource {
    feeds: Mutex<HashMap<String, Option<Vec<FeedItem>>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn with_items(self, url: &str, items: Vec<FeedItem>) -> Self {
        self.feeds.lock().unwrap().insert(url.into(), Some(items));
        self
    }

    pub fn with_failure(self, url: &str) -> Self {
        self.feeds.lock().unwrap().insert(url.into(), None);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.feeds.lock().unwrap().get(url) {
            Some(Some(items)) => Ok(items.clone()),
            _ => Err(FetchError::Status { status: 503 }),
        }
    }
}

/// Feed source that sleeps while tracking how many fetches overlap.
pub struct SlowSource {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl SlowSource {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for SlowSource {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>, FetchError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(vec![item(&format!("{url}#1"), "slow")])
    }
}

/// In-memory store that fails reads of chosen keys and, optionally, writes.
pub struct FlakyStore {
    inner: FileStore,
    failing_gets: Mutex<HashSet<String>>,
    fail_sets: Mutex<bool>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: FileStore::in_memory(),
            failing_gets: Mutex::new(HashSet::new()),
            fail_sets: Mutex::new(false),
        }
    }

    pub fn fail_get(&self, key: &str) {
        self.failing_gets.lock().unwrap().insert(key.into());
    }

    pub fn fail_sets(&self, fail: bool) {
        *self.fail_sets.lock().unwrap() = fail;
    }

    fn broken() -> StoreError {
        StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk unplugged"))
    }
}

impl KvStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.failing_gets.lock().unwrap().contains(key) {
            return Err(Self::broken());
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if *self.fail_sets.lock().unwrap() {
            return Err(Self::broken());
        }
        self.inner.set(key, value)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.expire(key, ttl)
    }

    fn flush_all(&self) -> Result<(), StoreError> {
        self.inner.flush_all()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    ScanStarted,
    Stale(String),
    Parsed(String),
    Entry(String),
    Error(String),
}

/// Collects every event published on a bus, in publication order.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl Recorder {
    pub fn attach(bus: &EventBus) -> Self {
        let recorder = Self::default();
        let events = Arc::clone(&recorder.events);
        bus.subscribe::<ScanStarted>(move |_: &()| {
            events.lock().unwrap().push(Recorded::ScanStarted);
            Ok(())
        });
        let events = Arc::clone(&recorder.events);
        bus.subscribe::<FeedStale>(move |feed: &str| {
            events.lock().unwrap().push(Recorded::Stale(feed.into()));
            Ok(())
        });
        let events = Arc::clone(&recorder.events);
        bus.subscribe::<FeedParsed>(move |feed: &str| {
            events.lock().unwrap().push(Recorded::Parsed(feed.into()));
            Ok(())
        });
        let events = Arc::clone(&recorder.events);
        bus.subscribe::<EntryDiscovered>(move |entry: &Entry| {
            events.lock().unwrap().push(Recorded::Entry(entry.id.clone()));
            Ok(())
        });
        let events = Arc::clone(&recorder.events);
        bus.subscribe::<ErrorReported>(move |err: &WatchError| {
            events.lock().unwrap().push(Recorded::Error(err.to_string()));
            Ok(())
        });
        recorder
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Recorded) -> bool) -> usize {
        self.events().iter().filter(|event| pred(event)).count()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }
}

/// Polls `cond` every 10ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
