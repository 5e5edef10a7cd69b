//! Persistent storage media for the local data store.
//!
//! A medium is an ordered log of serialized datum records. Each log line is
//! one self-contained JSON entry, either a `put` carrying a datum or a `del`
//! listing acknowledged ids, so a record is either fully persisted or absent.

use crate::datum::Datum;
use crate::store::error::{CorruptRecord, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

/// Minimum number of tombstones before a file log is compacted.
const COMPACT_MIN_TOMBSTONES: usize = 1024;

/// Operations the local store needs from durable storage.
pub trait StorageMedium: Send {
    /// Durably append one record.
    fn append(&mut self, datum: &Datum) -> Result<(), StoreError>;

    /// Durably delete records by id.
    fn delete(&mut self, ids: &[Uuid]) -> Result<(), StoreError>;

    /// Read back every live record in append order.
    fn scan(&mut self) -> Result<Recovered, StoreError>;
}

/// Result of scanning a medium.
#[derive(Debug, Default)]
pub struct Recovered {
    pub records: Vec<Datum>,
    pub corrupt: Vec<CorruptRecord>,
    pub tombstones: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogEntry {
    Put { datum: Datum },
    Del { ids: Vec<Uuid> },
}

fn encode_put(datum: &Datum) -> Result<String, StoreError> {
    // LogEntry owns its datum; serialize a borrowed mirror instead of cloning.
    #[derive(Serialize)]
    #[serde(tag = "op", rename = "put")]
    struct PutRef<'a> {
        datum: &'a Datum,
    }
    Ok(serde_json::to_string(&PutRef { datum })?)
}

fn encode_del(ids: &[Uuid]) -> Result<String, StoreError> {
    Ok(serde_json::to_string(&LogEntry::Del { ids: ids.to_vec() })?)
}

/// Replay log lines into the set of live records.
fn replay<'a>(lines: impl Iterator<Item = &'a str>) -> Recovered {
    let mut order: Vec<Uuid> = Vec::new();
    let mut live: HashMap<Uuid, Datum> = HashMap::new();
    let mut corrupt = Vec::new();
    let mut tombstones = 0;

    for (index, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(line) {
            Ok(LogEntry::Put { datum }) => {
                if live.insert(datum.id(), datum.clone()).is_none() {
                    order.push(datum.id());
                }
            }
            Ok(LogEntry::Del { ids }) => {
                for id in ids {
                    if live.remove(&id).is_some() {
                        tombstones += 1;
                    }
                }
            }
            Err(e) => corrupt.push(CorruptRecord {
                line: index + 1,
                reason: e.to_string(),
            }),
        }
    }

    let records = order
        .into_iter()
        .filter_map(|id| live.remove(&id))
        .collect();

    Recovered {
        records,
        corrupt,
        tombstones,
    }
}

/// Exclusive advisory lock guarding one log against a second writer.
///
/// The lock is taken on a sibling `.lock` file since compaction replaces the
/// log file itself. It is released when the descriptor closes.
struct LogLock {
    _file: fd_lock::RwLock<File>,
}

impl LogLock {
    fn acquire(log_path: &Path) -> Result<Self, StoreError> {
        let path = log_path.with_extension("lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut lock = fd_lock::RwLock::new(file);
        match lock.try_write() {
            // Keep the lock for the lifetime of the descriptor.
            Ok(guard) => std::mem::forget(guard),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                return Err(StoreError::Locked(log_path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Self { _file: lock })
    }
}

/// JSON-lines log file on disk.
pub struct FileMedium {
    path: PathBuf,
    file: File,
    // Length of the log up to its last complete line.
    end: u64,
    fsync: bool,
    live: usize,
    tombstones: usize,
    _lock: LogLock,
}

impl FileMedium {
    /// Open (or create) the log at `path`.
    ///
    /// A partially written trailing line left by a crash is truncated away.
    /// Fails with [`StoreError::Locked`] while another medium holds the log.
    pub fn open(path: impl Into<PathBuf>, fsync: bool) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock = LogLock::acquire(&path)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        truncate_torn_tail(&mut file, &path)?;
        let end = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path,
            file,
            end,
            fsync,
            live: 0,
            tombstones: 0,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the log at `path` without modifying it.
    ///
    /// Safe to call while another process owns the log; an unterminated
    /// trailing line is ignored rather than truncated.
    pub fn inspect(path: impl AsRef<Path>) -> Result<Recovered, StoreError> {
        let content = match fs::read_to_string(path.as_ref()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Recovered::default()),
            Err(e) => return Err(e.into()),
        };
        let complete = match content.rfind('\n') {
            Some(end) => &content[..=end],
            None => "",
        };
        Ok(replay(complete.lines()))
    }

    /// Append one line after the last complete line.
    ///
    /// Bytes a failed write left behind are cut off first, and a failed
    /// write is cut back immediately, so a fragment never merges with the
    /// next entry.
    fn write_line(&mut self, line: &str) -> Result<(), StoreError> {
        if self.file.metadata()?.len() != self.end {
            warn!(
                path = %self.path.display(),
                "Discarding partially written record"
            );
            self.file.set_len(self.end)?;
        }
        self.file.seek(SeekFrom::Start(self.end))?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        if let Err(e) = write_synced(&mut self.file, &buf, self.fsync) {
            if let Err(truncate) = self.file.set_len(self.end) {
                warn!(error = %truncate, "Could not cut back failed write");
            }
            return Err(e.into());
        }
        self.end += buf.len() as u64;
        Ok(())
    }

    fn read_all(&mut self) -> Result<String, StoreError> {
        let mut content = String::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_string(&mut content)?;
        self.file.seek(SeekFrom::End(0))?;
        Ok(content)
    }

    fn should_compact(&self) -> bool {
        self.tombstones >= COMPACT_MIN_TOMBSTONES && self.tombstones > self.live
    }

    /// Rewrite the log with only live records, swapping it in atomically.
    fn compact(&mut self, records: &[Datum]) -> Result<(), StoreError> {
        let tmp_path = self.path.with_extension("log.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for datum in records {
                let mut line = encode_put(datum)?;
                line.push('\n');
                tmp.write_all(line.as_bytes())?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;
        self.end = self.file.seek(SeekFrom::End(0))?;

        info!(
            path = %self.path.display(),
            live = records.len(),
            dropped = self.tombstones,
            "Compacted local data log"
        );
        self.live = records.len();
        self.tombstones = 0;
        Ok(())
    }
}

fn write_synced(file: &mut File, buf: &[u8], fsync: bool) -> std::io::Result<()> {
    file.write_all(buf)?;
    file.flush()?;
    if fsync {
        file.sync_data()?;
    }
    Ok(())
}

fn truncate_torn_tail(file: &mut File, path: &Path) -> Result<(), StoreError> {
    let mut content = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut content)?;

    if content.last().map_or(true, |&b| b == b'\n') {
        return Ok(());
    }

    let keep = content
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |pos| pos + 1);
    warn!(
        path = %path.display(),
        discarded_bytes = content.len() - keep,
        "Truncating partially written record"
    );
    file.set_len(keep as u64)?;
    Ok(())
}

impl StorageMedium for FileMedium {
    fn append(&mut self, datum: &Datum) -> Result<(), StoreError> {
        let line = encode_put(datum)?;
        self.write_line(&line)?;
        self.live += 1;
        Ok(())
    }

    fn delete(&mut self, ids: &[Uuid]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let line = encode_del(ids)?;
        self.write_line(&line)?;
        self.live = self.live.saturating_sub(ids.len());
        self.tombstones += ids.len();

        if self.should_compact() {
            let recovered = replay(self.read_all()?.lines());
            self.compact(&recovered.records)?;
        }
        Ok(())
    }

    fn scan(&mut self) -> Result<Recovered, StoreError> {
        let content = self.read_all()?;
        let recovered = replay(content.lines());
        self.live = recovered.records.len();
        self.tombstones = recovered.tombstones;

        if !recovered.corrupt.is_empty() || self.should_compact() {
            self.compact(&recovered.records)?;
        }
        Ok(recovered)
    }
}

#[derive(Debug, Default)]
struct MemoryLog {
    lines: Vec<String>,
    fail_writes: bool,
}

/// In-memory log for tests and ephemeral sessions.
///
/// Clones share the same log, so dropping a store and opening a new one over
/// a clone simulates a process restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedium {
    log: Arc<Mutex<MemoryLog>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> std::sync::MutexGuard<'_, MemoryLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a raw line, bypassing encoding.
    pub fn push_raw_line(&self, line: impl Into<String>) {
        self.log().lines.push(line.into());
    }

    /// Make every subsequent write fail, as an unwritable medium would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.log().fail_writes = fail;
    }

    pub fn line_count(&self) -> usize {
        self.log().lines.len()
    }
}

impl StorageMedium for MemoryMedium {
    fn append(&mut self, datum: &Datum) -> Result<(), StoreError> {
        let line = encode_put(datum)?;
        let mut log = self.log();
        if log.fail_writes {
            return Err(StoreError::Io("medium is not writable".to_string()));
        }
        log.lines.push(line);
        Ok(())
    }

    fn delete(&mut self, ids: &[Uuid]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let line = encode_del(ids)?;
        let mut log = self.log();
        if log.fail_writes {
            return Err(StoreError::Io("medium is not writable".to_string()));
        }
        log.lines.push(line);
        Ok(())
    }

    fn scan(&mut self) -> Result<Recovered, StoreError> {
        let log = self.log();
        Ok(replay(log.lines.iter().map(String::as_str)))
    }
}
