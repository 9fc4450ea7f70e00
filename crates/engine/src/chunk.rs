//! Chunks: the tree's uniform view of a memtable or an SSTable.
//!
//! A chunk is a named unit of storage in the root slot or in a layer. Two
//! kinds exist and share the capability set `get` / `size` / `iter` /
//! `num_entries` / `delete`; only the memtable kind accepts `set`, and
//! dispatching a write to a table is reported as
//! [`Unsupported`](crate::Error::Unsupported) rather than being modeled
//! away, because layer chunks are loaded from the manifest by kind.

use crate::memtable::MemtableChunk;
use crate::merge::MergeEntry;
use crate::{Error, Result};
use sstable::{SSTable, SSTableIterator};

/// Chunk kind discriminant as persisted in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkKind {
    Memtable = 1,
    Table = 2,
}

impl ChunkKind {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(ChunkKind::Memtable),
            2 => Some(ChunkKind::Table),
            _ => None,
        }
    }
}

/// A named chunk and its backing storage.
pub(crate) struct Chunk {
    pub(crate) name: String,
    pub(crate) data: ChunkData,
}

impl Chunk {
    pub(crate) fn kind(&self) -> ChunkKind {
        match self.data {
            ChunkData::Memtable(_) => ChunkKind::Memtable,
            ChunkData::Table(_) => ChunkKind::Table,
        }
    }
}

/// The two chunk variants.
pub(crate) enum ChunkData {
    Memtable(MemtableChunk),
    Table(SSTable),
}

impl ChunkData {
    /// Point lookup: `(kind, value)` when the chunk knows the key.
    pub(crate) fn get(&self, key: &str) -> Result<Option<(u64, Vec<u8>)>> {
        match self {
            ChunkData::Memtable(m) => Ok(m.get(key)),
            ChunkData::Table(t) => Ok(t.read(key)?),
        }
    }

    /// Record a mutation. Only meaningful on the memtable kind.
    pub(crate) fn set(&self, key: &str, kind: u64, value: &[u8]) -> Result<()> {
        match self {
            ChunkData::Memtable(m) => m.set(key, kind, value),
            ChunkData::Table(_) => Err(Error::Unsupported),
        }
    }

    /// Data bytes held by the chunk. Advisory for memtables, exact for
    /// tables.
    pub(crate) fn size(&self) -> u64 {
        match self {
            ChunkData::Memtable(m) => m.size(),
            ChunkData::Table(t) => t.size(),
        }
    }

    pub(crate) fn num_entries(&self) -> i64 {
        match self {
            ChunkData::Memtable(m) => m.num_entries(),
            ChunkData::Table(t) => t.num_entries(),
        }
    }

    /// Ascending iteration over the chunk's entries.
    pub(crate) fn iter(&self) -> ChunkIterator<'_> {
        match self {
            ChunkData::Memtable(m) => ChunkIterator::Memtable(m.iter()),
            ChunkData::Table(t) => ChunkIterator::Table(t.iter()),
        }
    }

    /// Removes the chunk's on-disk artifacts: the WAL file of a memtable,
    /// the five table artifacts of an SSTable.
    pub(crate) fn delete(&self) -> Result<()> {
        match self {
            ChunkData::Memtable(m) => m.delete(),
            ChunkData::Table(t) => Ok(t.delete()?),
        }
    }
}

/// A cursor over one chunk, produced by [`ChunkData::iter`] and consumed
/// by the k-way merge. Memtable iteration holds that skiplist's read lock
/// for the cursor's lifetime.
pub(crate) enum ChunkIterator<'a> {
    Memtable(skiplist::Iter<'a, String, crate::memtable::StoredValue>),
    Table(SSTableIterator<'a>),
}

impl ChunkIterator<'_> {
    pub(crate) fn next_entry(&mut self) -> Result<Option<MergeEntry>> {
        match self {
            ChunkIterator::Memtable(it) => Ok(it.next().map(|(key, v)| MergeEntry {
                kind: v.kind,
                key,
                value: v.data,
            })),
            ChunkIterator::Table(it) => Ok(it
                .next_entry()?
                .map(|(kind, key, value)| MergeEntry { kind, key, value })),
        }
    }
}
