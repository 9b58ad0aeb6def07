use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rss_watch_core::{Entry, FileStore, FreshnessStore, KvStore, StoreError};

fn temp_dir(tag: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "rss_watch_{tag}_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    dir
}

fn sample_entry() -> Entry {
    Entry {
        id: "urn:entry:1".into(),
        feed: "http://example.com/feed".into(),
        title: "Item 1".into(),
        date: Utc.with_ymd_and_hms(2024, 10, 21, 7, 28, 0).unwrap(),
        link: "http://example.com/1".into(),
    }
}

#[test]
fn set_clears_expiry_and_expire_needs_a_key() {
    let store = FileStore::in_memory();
    assert!(!store.expire("missing", Duration::from_secs(5)).unwrap());

    store.set_ex("k", "v", Duration::from_millis(1)).unwrap();
    store.set("k", "v2").unwrap();
    std::thread::sleep(Duration::from_millis(20));

    assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));
}

#[test]
fn expired_keys_disappear() {
    let store = FileStore::in_memory();
    store.set("k", "v").unwrap();
    assert!(store.expire("k", Duration::from_millis(30)).unwrap());
    assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(store.get("k").unwrap(), None);
    assert!(!store.expire("k", Duration::from_secs(5)).unwrap());
}

#[test]
fn reopened_store_keeps_live_records_only() {
    let dir = temp_dir("reopen");
    {
        let store = FileStore::open(&dir).unwrap();
        store.set("entry", "{}").unwrap();
        store.set_ex("marker", "marker", Duration::from_secs(60)).unwrap();
        store.set_ex("short", "short", Duration::from_millis(10)).unwrap();
    }
    std::thread::sleep(Duration::from_millis(30));

    let store = FileStore::open(&dir).unwrap();
    assert_eq!(store.get("entry").unwrap().as_deref(), Some("{}"));
    assert_eq!(store.get("marker").unwrap().as_deref(), Some("marker"));
    assert_eq!(store.get("short").unwrap(), None);

    store.flush_all().unwrap();
    drop(store);
    let store = FileStore::open(&dir).unwrap();
    assert_eq!(store.get("entry").unwrap(), None);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn corrupt_store_falls_back_to_tmp_snapshot() {
    let dir = temp_dir("corrupt");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("store.json"), b"{ this is not json ").unwrap();
    std::fs::write(
        dir.join("store.json.tmp"),
        br#"{"records":{"k":{"value":"from-tmp"}}}"#,
    )
    .unwrap();

    let store = FileStore::open(&dir).unwrap();
    assert_eq!(store.get("k").unwrap().as_deref(), Some("from-tmp"));

    std::fs::remove_file(dir.join("store.json.tmp")).unwrap();
    std::fs::write(dir.join("store.json"), b"garbage").unwrap();
    assert!(matches!(FileStore::open(&dir), Err(StoreError::Corrupt(_))));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn marker_round_trip() {
    let store = FreshnessStore::new(Arc::new(FileStore::in_memory()));
    let feed = "http://example.com/feed";
    assert!(!store.has_marker(feed).unwrap());

    store.refresh_marker(feed, Duration::from_secs(60)).unwrap();
    assert!(store.has_marker(feed).unwrap());

    store.refresh_marker(feed, Duration::from_millis(20)).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(!store.has_marker(feed).unwrap());
}

#[test]
fn persisted_entry_reads_back_identical() {
    let dir = temp_dir("entry");
    let entry = sample_entry();
    {
        let store = FreshnessStore::new(Arc::new(FileStore::open(&dir).unwrap()));
        assert!(!store.is_known(&entry.id).unwrap());
        store.persist_entry(&entry).unwrap();
        assert!(store.is_known(&entry.id).unwrap());
    }

    let store = FreshnessStore::new(Arc::new(FileStore::open(&dir).unwrap()));
    assert_eq!(store.load_entry(&entry.id).unwrap(), Some(entry));
    assert_eq!(store.load_entry("urn:entry:unknown").unwrap(), None);

    let _ = std::fs::remove_dir_all(&dir);
}

fn journal_lines(dir: &std::path::Path) -> usize {
    std::fs::read_to_string(dir.join("store.log"))
        .unwrap()
        .lines()
        .count()
}

#[test]
fn writes_are_journaled_and_compacted_on_open() {
    let dir = temp_dir("journal");
    {
        let store = FileStore::open(&dir).unwrap();
        store.set("a", "1").unwrap();
        store.set_ex("b", "2", Duration::from_secs(60)).unwrap();
        assert!(store.expire("a", Duration::from_secs(60)).unwrap());
        store.set("c", "3").unwrap();
    }

    // mutations only append; the snapshot is written when the store is opened
    assert!(!dir.join("store.json").exists());
    assert_eq!(journal_lines(&dir), 4);

    let store = FileStore::open(&dir).unwrap();
    assert_eq!(journal_lines(&dir), 0);
    assert!(dir.join("store.json").exists());
    assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
    assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));
    assert_eq!(store.get("c").unwrap().as_deref(), Some("3"));
    drop(store);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn many_writes_leave_the_snapshot_untouched() {
    let dir = temp_dir("bulk");
    {
        let store = FileStore::open(&dir).unwrap();
        store.set("seed", "x").unwrap();
    }
    let store = FileStore::open(&dir).unwrap();
    let snapshot = std::fs::read(dir.join("store.json")).unwrap();

    for n in 0..2000 {
        store.set(&format!("entry-{n}"), &"v".repeat(200)).unwrap();
    }
    assert_eq!(std::fs::read(dir.join("store.json")).unwrap(), snapshot);
    drop(store);
    assert_eq!(journal_lines(&dir), 2000);

    let store = FileStore::open(&dir).unwrap();
    assert_eq!(store.get("seed").unwrap().as_deref(), Some("x"));
    assert!(store.get("entry-1999").unwrap().is_some());
    drop(store);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn torn_journal_tail_is_dropped() {
    let dir = temp_dir("torn");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("store.log"),
        "{\"op\":\"put\",\"key\":\"k\",\"record\":{\"value\":\"v\"}}\n{\"op\":\"pu",
    )
    .unwrap();

    let store = FileStore::open(&dir).unwrap();
    assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    drop(store);

    std::fs::write(
        dir.join("store.log"),
        "garbage\n{\"op\":\"flush\"}\n",
    )
    .unwrap();
    assert!(matches!(FileStore::open(&dir), Err(StoreError::Corrupt(_))));

    let _ = std::fs::remove_dir_all(&dir);
}
