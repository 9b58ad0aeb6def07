use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::StoreError;

const SNAPSHOT_FILE: &str = "store.json";
const JOURNAL_FILE: &str = "store.log";

/// Key-value engine with per-key expiry.
///
/// Implementations must be safe to share between the scanner and every
/// ingestion task; callers perform no locking of their own.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value`, clearing any expiry previously set on `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Returns `false` when `key` does not exist.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.set(key, value)?;
        self.expire(key, ttl)?;
        Ok(())
    }

    fn flush_all(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl Record {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    records: HashMap<String, Record>,
}

/// One line of `store.log`. Replaying the same line twice is harmless.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalOp {
    Put { key: String, record: Record },
    Flush,
}

/// Appends mutations to `store.log` from a dedicated writer thread.
///
/// Callers only enqueue. A failed write is remembered and returned by the
/// next mutation. Dropping the journal waits for every queued line to land.
#[derive(Debug)]
struct Journal {
    tx: Option<mpsc::UnboundedSender<JournalOp>>,
    writer: Option<thread::JoinHandle<()>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl Journal {
    fn start(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let failure = Arc::new(Mutex::new(None));
        let writer = thread::Builder::new().name("store-journal".into()).spawn({
            let failure = Arc::clone(&failure);
            move || write_journal(file, rx, &failure)
        })?;
        Ok(Self {
            tx: Some(tx),
            writer: Some(writer),
            failure,
        })
    }

    fn append(&self, op: JournalOp) -> Result<(), StoreError> {
        if let Some(reason) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(StoreError::Journal(reason));
        }
        self.tx
            .as_ref()
            .ok_or_else(|| StoreError::Journal("journal closed".into()))?
            .send(op)
            .map_err(|_| StoreError::Journal("journal writer stopped".into()))
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                error!("store journal writer panicked");
            }
        }
    }
}

fn write_journal(
    file: File,
    mut rx: mpsc::UnboundedReceiver<JournalOp>,
    failure: &Mutex<Option<String>>,
) {
    let mut out = BufWriter::new(file);
    while let Some(op) = rx.blocking_recv() {
        let mut batch = vec![op];
        while let Ok(op) = rx.try_recv() {
            batch.push(op);
        }
        if let Err(err) = append_batch(&mut out, &batch) {
            error!(error = %err, "store journal write failed");
            *failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
            return;
        }
    }
}

fn append_batch(out: &mut BufWriter<File>, batch: &[JournalOp]) -> Result<(), StoreError> {
    for op in batch {
        serde_json::to_writer(&mut *out, op)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// JSON-file backed [`KvStore`].
///
/// Reads and writes are served from memory. Each mutation is appended to
/// `<dir>/store.log` off the calling thread; opening the store replays that
/// log over the `<dir>/store.json` snapshot, drops expired records and writes
/// a fresh snapshot through a temp file and a rename.
#[derive(Debug)]
pub struct FileStore {
    inner: RwLock<StoreData>,
    journal: Option<Journal>,
}

impl FileStore {
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(StoreData::default()),
            journal: None,
        }
    }

    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let snapshot = dir.join(SNAPSHOT_FILE);
        let journal = dir.join(JOURNAL_FILE);

        let mut data = load_snapshot(&snapshot)?;
        let replayed = replay_journal(&journal, &mut data)?;
        let before = data.records.len();
        let now = Utc::now();
        data.records.retain(|_, record| record.is_live(now));
        if replayed > 0 || data.records.len() < before {
            write_snapshot(&snapshot, &data)?;
            File::create(&journal)?;
        }
        debug!(
            dir = %dir.display(),
            records = data.records.len(),
            replayed,
            "opened store"
        );

        Ok(Self {
            inner: RwLock::new(data),
            journal: Some(Journal::start(&journal)?),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreData>, StoreError> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreData>, StoreError> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }

    // Called with the write guard held so the log follows mutation order.
    fn log(&self, op: JournalOp) -> Result<(), StoreError> {
        match &self.journal {
            Some(journal) => journal.append(op),
            None => Ok(()),
        }
    }

    fn put(&self, key: &str, record: Record) -> Result<(), StoreError> {
        let mut data = self.write()?;
        data.records.insert(key.to_owned(), record.clone());
        self.log(JournalOp::Put {
            key: key.to_owned(),
            record,
        })
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let data = self.read()?;
        Ok(data
            .records
            .get(key)
            .filter(|record| record.is_live(Utc::now()))
            .map(|record| record.value.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.put(
            key,
            Record {
                value: value.to_owned(),
                expires_at: None,
            },
        )
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut data = self.write()?;
        let now = Utc::now();
        let record = match data.records.get_mut(key) {
            Some(record) if record.is_live(now) => {
                record.expires_at = Some(expiry(now, ttl));
                record.clone()
            }
            _ => return Ok(false),
        };
        self.log(JournalOp::Put {
            key: key.to_owned(),
            record,
        })?;
        Ok(true)
    }

    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.put(
            key,
            Record {
                value: value.to_owned(),
                expires_at: Some(expiry(Utc::now(), ttl)),
            },
        )
    }

    fn flush_all(&self) -> Result<(), StoreError> {
        let mut data = self.write()?;
        data.records.clear();
        self.log(JournalOp::Flush)
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn load_snapshot(path: &Path) -> Result<StoreData, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(StoreData::default()),
        Err(err) => return Err(err.into()),
    };
    match serde_json::from_slice::<StoreData>(&bytes) {
        Ok(data) => Ok(data),
        Err(err) => {
            warn!(error = %err, path = %path.display(), "failed to parse store, trying tmp fallback");
            let tmp = path.with_extension("json.tmp");
            let tmp_bytes = std::fs::read(&tmp).map_err(|_| StoreError::Corrupt(err))?;
            Ok(serde_json::from_slice(&tmp_bytes)?)
        }
    }
}

fn write_snapshot(path: &Path, data: &StoreData) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(data)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Applies `store.log` to `data` and returns how many lines it held.
///
/// An unreadable final line is a write cut short and is dropped; an
/// unreadable line anywhere else means the log is corrupt.
fn replay_journal(path: &Path, data: &mut StoreData) -> Result<usize, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    for (n, line) in lines.iter().enumerate() {
        match serde_json::from_str::<JournalOp>(line) {
            Ok(JournalOp::Put { key, record }) => {
                data.records.insert(key, record);
            }
            Ok(JournalOp::Flush) => data.records.clear(),
            Err(err) if n + 1 == lines.len() => {
                warn!(error = %err, path = %path.display(), "dropping torn journal tail");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(lines.len())
}
