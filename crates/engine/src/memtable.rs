//! The memtable chunk: a skiplist paired with its write-ahead log.

use crate::{Result, MEMTABLE_MAX_LEVELS};
use parking_lot::Mutex;
use skiplist::SkipList;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use wal::{Wal, WalError};

/// What the memtable stores per key: the record kind (write or tombstone)
/// and the value bytes.
#[derive(Debug, Clone)]
pub(crate) struct StoredValue {
    pub(crate) kind: u64,
    pub(crate) data: Vec<u8>,
}

/// Path of the WAL backing the memtable chunk named `name`.
pub(crate) fn wal_path(root_dir: &Path, name: &str) -> PathBuf {
    root_dir.join(format!("wal-{name}.log"))
}

/// The only writable chunk kind.
///
/// Mutations append to the WAL and then upsert the skiplist; both happen
/// under the WAL mutex, so the order of records in the log is exactly the
/// order the skiplist observed. Lookups go straight to the skiplist, which
/// has its own reader-writer lock.
///
/// `data_size` tracks the bytes of live values as a rotation heuristic. It
/// is advisory: overwrites adjust it with saturating arithmetic and it is
/// never allowed to underflow.
pub(crate) struct MemtableChunk {
    list: SkipList<String, StoredValue>,
    wal: Mutex<Wal>,
    data_size: AtomicU64,
}

impl MemtableChunk {
    /// Opens the memtable chunk named `name` under `root_dir`.
    ///
    /// If a WAL for that name exists its records are replayed into the
    /// skiplist in append order (the sole recovery path for writes that
    /// never reached an SSTable), and the log is then
    /// reopened for appending.
    pub(crate) fn open(root_dir: &Path, name: &str, sync: bool) -> Result<Self> {
        let path = wal_path(root_dir, name);

        let entries = match wal::load(&path) {
            Ok(entries) => entries,
            Err(WalError::NotFound) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let list = SkipList::new(MEMTABLE_MAX_LEVELS);
        let mut data_size = 0u64;
        for entry in entries {
            let new_len = entry.data.len() as u64;
            let old = list.insert(
                entry.key,
                StoredValue {
                    kind: entry.kind,
                    data: entry.data,
                },
            );
            let old_len = old.map(|v| v.data.len() as u64).unwrap_or(0);
            data_size = data_size.saturating_sub(old_len).saturating_add(new_len);
        }

        let wal = Wal::open(&path, sync)?;
        Ok(Self {
            list,
            wal: Mutex::new(wal),
            data_size: AtomicU64::new(data_size),
        })
    }

    /// Appends to the WAL, then upserts the skiplist.
    pub(crate) fn set(&self, key: &str, kind: u64, value: &[u8]) -> Result<()> {
        let mut wal = self.wal.lock();
        wal.append(kind, key, value)?;

        let old = self.list.insert(
            key.to_string(),
            StoredValue {
                kind,
                data: value.to_vec(),
            },
        );

        // Only this thread mutates the counter right now (the WAL mutex is
        // held), so load + store is race-free.
        let old_len = old.map(|v| v.data.len() as u64).unwrap_or(0);
        let size = self.data_size.load(Ordering::Relaxed);
        self.data_size.store(
            size.saturating_sub(old_len).saturating_add(value.len() as u64),
            Ordering::Relaxed,
        );
        Ok(())
    }

    pub(crate) fn get(&self, key: &str) -> Option<(u64, Vec<u8>)> {
        self.list.get(key).map(|v| (v.kind, v.data))
    }

    /// Advisory size in value bytes, used for the rotation decision.
    pub(crate) fn size(&self) -> u64 {
        self.data_size.load(Ordering::Relaxed)
    }

    pub(crate) fn num_entries(&self) -> i64 {
        self.list.len() as i64
    }

    /// Ascending iteration; holds the skiplist's read lock while alive.
    pub(crate) fn iter(&self) -> skiplist::Iter<'_, String, StoredValue> {
        self.list.iter()
    }

    /// Removes the WAL file.
    pub(crate) fn delete(&self) -> Result<()> {
        self.wal.lock().delete()?;
        Ok(())
    }
}
