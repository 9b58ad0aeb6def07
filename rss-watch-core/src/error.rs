use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store data is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("store journal failed: {0}")]
    Journal(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {status}")]
    Status { status: u16 },
    #[error("feed parsing error: {0}")]
    Parse(String),
    #[error("fetch exceeded deadline of {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config field {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("store error on key {key}: {source}")]
    Store { key: String, source: StoreError },
    #[error("failed to fetch feed {feed}: {source}")]
    Fetch { feed: String, source: FetchError },
    #[error("failed to encode entry {entry}: {source}")]
    Serialization {
        entry: String,
        source: serde_json::Error,
    },
    #[error("{topic} handler failed: {message}")]
    Handler { topic: &'static str, message: String },
    #[error("cannot build http client: {0}")]
    HttpClient(#[source] FetchError),
    #[error("dispatcher is no longer accepting feeds")]
    DispatcherClosed,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("halted after error: {reason}")]
    Halted { reason: String },
}

impl WatchError {
    pub fn store(key: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            key: key.into(),
            source,
        }
    }
}
