use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{redirect, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FetchError;

/// One syndication item as persisted under its ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    pub id: String,
    pub feed: String,
    pub title: String,
    pub date: DateTime<Utc>,
    pub link: String,
}

impl Entry {
    pub fn from_item(feed: &str, item: FeedItem) -> Self {
        Self {
            id: item.id,
            feed: feed.to_owned(),
            title: item.title,
            date: item.date,
            link: item.link,
        }
    }
}

/// An item as returned by a [`FeedSource`], before it is tied to its feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    pub date: DateTime<Utc>,
    pub link: String,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: Client,
}

impl HttpFeedSource {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .redirect(redirect::Policy::limited(5))
            .user_agent(concat!("rss-watch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await?;
        parse_feed(&bytes, Utc::now())
    }
}

/// Parses an RSS 2.0 document, falling back to Atom.
///
/// Items are identified by GUID, then link, then title; items carrying none of
/// them are dropped. Undated items take `fetched_at`.
pub fn parse_feed(body: &[u8], fetched_at: DateTime<Utc>) -> Result<Vec<FeedItem>, FetchError> {
    let rss_err = match rss::Channel::read_from(Cursor::new(body)) {
        Ok(channel) => {
            return Ok(channel
                .items()
                .iter()
                .filter_map(|item| from_rss_item(item, fetched_at))
                .collect())
        }
        Err(err) => err,
    };

    match atom_syndication::Feed::read_from(Cursor::new(body)) {
        Ok(feed) => Ok(feed
            .entries()
            .iter()
            .filter_map(|entry| from_atom_entry(entry, fetched_at))
            .collect()),
        Err(atom_err) => Err(FetchError::Parse(format!(
            "not an RSS document ({rss_err}) nor an Atom document ({atom_err})"
        ))),
    }
}

fn from_rss_item(item: &rss::Item, fetched_at: DateTime<Utc>) -> Option<FeedItem> {
    let title = item.title().unwrap_or_default().to_owned();
    let link = item.link().unwrap_or_default().to_owned();
    let id = item
        .guid()
        .map(|guid| guid.value().to_owned())
        .filter(|guid| !guid.is_empty())
        .or_else(|| non_empty(&link))
        .or_else(|| non_empty(&title));
    let Some(id) = id else {
        debug!("skipping rss item without guid, link or title");
        return None;
    };

    let date = item
        .pub_date()
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(fetched_at);

    Some(FeedItem {
        id,
        title,
        date,
        link,
    })
}

fn from_atom_entry(entry: &atom_syndication::Entry, fetched_at: DateTime<Utc>) -> Option<FeedItem> {
    let title = entry.title().value.clone();
    let link = entry
        .links()
        .iter()
        .find(|link| link.rel() == "alternate")
        .or_else(|| entry.links().first())
        .map(|link| link.href().to_owned())
        .unwrap_or_default();
    let id = non_empty(entry.id())
        .or_else(|| non_empty(&link))
        .or_else(|| non_empty(&title));
    let Some(id) = id else {
        debug!("skipping atom entry without id, link or title");
        return None;
    };

    let date = entry
        .published()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| {
            let updated = entry.updated().with_timezone(&Utc);
            // atom_syndication defaults a missing <updated> to the epoch
            if updated.timestamp() == 0 {
                fetched_at
            } else {
                updated
            }
        });

    Some(FeedItem {
        id,
        title,
        date,
        link,
    })
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_owned())
}
