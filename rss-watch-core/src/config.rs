use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::dispatcher::DispatchLimits;
use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct WatchConfig {
    pub exit_on_error: bool,
    #[serde(rename = "DBPath")]
    pub db_path: Option<PathBuf>,
    pub feeds: Vec<String>,
    pub throttling: Throttling,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Throttling {
    /// Parsed for compatibility, not used.
    pub concurrent_interval: u64,
    pub max_concurrent: u32,
    /// Milliseconds between scan cycles.
    pub monitor_frequency: u64,
    /// Seconds a freshness marker lives.
    pub old_feed_threshold: u64,
    /// Seconds an ingestion may run before its permit is reclaimed.
    pub fetch_timeout: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            exit_on_error: false,
            db_path: None,
            feeds: Vec::new(),
            throttling: Throttling::default(),
        }
    }
}

impl Default for Throttling {
    fn default() -> Self {
        Self {
            concurrent_interval: 0,
            max_concurrent: 4,
            monitor_frequency: 60_000,
            old_feed_threshold: 3600,
            fetch_timeout: 30,
        }
    }
}

impl WatchConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: WatchConfig = serde_json::from_str(content)?;
        config.validate()
    }

    /// Rejects zero-valued throttling and non-http feeds, and drops duplicate
    /// feeds keeping the first occurrence.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        let throttling = &self.throttling;
        for (field, value) in [
            ("Throttling.MaxConcurrent", u64::from(throttling.max_concurrent)),
            ("Throttling.MonitorFrequency", throttling.monitor_frequency),
            ("Throttling.OldFeedThreshold", throttling.old_feed_threshold),
            ("Throttling.FetchTimeout", throttling.fetch_timeout),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_owned(),
                });
            }
        }

        for feed in &self.feeds {
            let url = Url::parse(feed).map_err(|err| ConfigError::Invalid {
                field: "Feeds",
                reason: format!("{feed}: {err}"),
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid {
                    field: "Feeds",
                    reason: format!("{feed}: unsupported scheme {}", url.scheme()),
                });
            }
        }

        let mut seen = HashSet::new();
        self.feeds.retain(|feed| {
            let first = seen.insert(feed.clone());
            if !first {
                warn!(feed = %feed, "duplicate feed ignored");
            }
            first
        });

        Ok(self)
    }

    /// `DBPath`, or the platform data directory when unset or empty.
    pub fn resolved_db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(path) if !path.as_os_str().is_empty() => path.clone(),
            _ => dirs::data_dir()
                .map(|dir| dir.join("rss-watch"))
                .unwrap_or_else(|| PathBuf::from("data")),
        }
    }

    pub fn monitor_frequency(&self) -> Duration {
        Duration::from_millis(self.throttling.monitor_frequency)
    }

    pub fn old_feed_threshold(&self) -> Duration {
        Duration::from_secs(self.throttling.old_feed_threshold)
    }

    pub fn dispatch_limits(&self) -> DispatchLimits {
        DispatchLimits {
            max_concurrent: self.throttling.max_concurrent as usize,
            fetch_timeout: Duration::from_secs(self.throttling.fetch_timeout),
        }
    }
}
