//! # WAL: the write-ahead log
//!
//! An append-only journal of mutations backing a single memtable. Every
//! mutation is appended here **before** the in-memory update; on restart the
//! log is replayed to rebuild the memtable, so no acknowledged write is lost
//! short of an OS-level buffer loss (appends are not fsynced unless the
//! `sync` knob is on).
//!
//! ## Record format
//!
//! One record per line, `\n`-separated, each a self-describing JSON
//! envelope:
//!
//! ```text
//! {"Kind":4096,"Key":"user:17","Data":[104,105]}
//! ```
//!
//! `Kind` is an opaque `u64` owned by the engine (write vs. tombstone); the
//! log itself does not interpret it. JSON never emits a raw newline inside
//! a record, so the separator is unambiguous and a record is complete
//! exactly when its line is terminated.
//!
//! ## Crash behavior on load
//!
//! A crash mid-append leaves an unterminated final line; [`load`] discards
//! it and returns every fully formed record before it, oldest first. A
//! *terminated* line that does not parse is real corruption and is reported
//! as [`WalError::Format`].

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const ENTRY_SEPARATOR: u8 = b'\n';

/// A single logged mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WalEntry {
    /// Record kind tag, uninterpreted by the log.
    pub kind: u64,
    /// The mutated key.
    pub key: String,
    /// The value bytes; present but unused for tombstones.
    pub data: Vec<u8>,
}

/// Borrowed view used on the append path so a record can be serialized
/// without copying key or value.
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WalEntryRef<'a> {
    kind: u64,
    key: &'a str,
    data: &'a [u8],
}

/// Errors from log operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying read or write failure.
    #[error("wal io error: {0}")]
    Io(#[from] io::Error),

    /// The log file does not exist. Distinguished from [`WalError::Io`] so
    /// the engine can treat it as "first run".
    #[error("wal file not found")]
    NotFound,

    /// A terminated record that does not parse as an envelope.
    #[error("malformed wal record: {0}")]
    Format(#[from] serde_json::Error),
}

/// An open, append-only log file.
pub struct Wal {
    file: File,
    path: PathBuf,
    sync: bool,
    /// Scratch buffer reused across appends.
    buf: Vec<u8>,
}

impl Wal {
    /// Opens the log at `path` for appending, creating it if absent.
    ///
    /// With `sync` set, every append is followed by `sync_all`; the default
    /// engine configuration leaves durability to the OS write-back cache.
    pub fn open<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file,
            path,
            sync,
            buf: Vec::with_capacity(256),
        })
    }

    /// Appends one record. The record is on disk (or at least in the OS
    /// cache) before this returns; callers apply the in-memory update only
    /// afterwards.
    pub fn append(&mut self, kind: u64, key: &str, data: &[u8]) -> Result<(), WalError> {
        self.buf.clear();
        serde_json::to_writer(&mut self.buf, &WalEntryRef { kind, key, data })?;
        self.buf.push(ENTRY_SEPARATOR);

        self.file.write_all(&self.buf)?;
        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlinks the backing file. The open handle is released when the `Wal`
    /// is dropped; on unix the unlink is effective immediately.
    pub fn delete(&self) -> Result<(), WalError> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

/// Loads all fully formed records from the log at `path`, oldest first.
///
/// A missing file is [`WalError::NotFound`]. An unterminated trailing line
/// (partial append at crash time) is silently discarded.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<WalEntry>, WalError> {
    let file = match File::open(path.as_ref()) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(WalError::NotFound),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(ENTRY_SEPARATOR, &mut line)?;
        if n == 0 {
            break;
        }
        if line.last() != Some(&ENTRY_SEPARATOR) {
            // Partial record at the tail: a crash interrupted the append.
            break;
        }
        let entry: WalEntry = serde_json::from_slice(&line[..line.len() - 1])?;
        entries.push(entry);
    }

    Ok(entries)
}
