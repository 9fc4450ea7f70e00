//! # SSTable: sorted string tables
//!
//! An SSTable is an immutable on-disk sorted run of `(kind, key, value)`
//! records. It is produced exclusively by the streaming [`SSTableBuilder`],
//! never mutated afterwards, and deleted only once a compaction has
//! superseded it.
//!
//! ## On-disk artifacts
//!
//! A table named `N` is five files under its root directory:
//!
//! | file        | contents                                              |
//! |-------------|-------------------------------------------------------|
//! | `N.data`    | concatenated data entries (tag, length, value bytes)  |
//! | `N.index`   | concatenated index entries in ascending key order     |
//! | `N.spindex` | sparse index: anchors into `N.index`, JSON            |
//! | `N.bloom`   | serialized bloom filter                               |
//! | `N.meta`    | entry count, JSON                                     |
//!
//! `.data` and `.index` are memory-mapped for random access; the other
//! three are small and loaded whole at open.
//!
//! ## Read path
//!
//! A point lookup consults the bloom filter, then binary-searches the
//! in-memory sparse index to narrow the full index to one block, linearly
//! scans that block for the key, and finally fetches the value from the
//! data file at the offset the index entry names.

use std::io;
use thiserror::Error;

mod builder;
pub mod format;
mod iterator;
mod table;

pub use builder::SSTableBuilder;
pub use iterator::SSTableIterator;
pub use table::SSTable;

/// Errors from building or reading a table.
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying read or write failure.
    #[error("sstable io error: {0}")]
    Io(#[from] io::Error),

    /// An artifact that does not decode: bad JSON, a truncated index or
    /// data entry, an offset pointing outside its file.
    #[error("malformed sstable artifact: {0}")]
    Format(String),

    /// The builder was fed a key smaller than the previous one.
    #[error("keys must be added to an sstable in ascending order")]
    OrderViolation,

    /// A write or second build was attempted on an already-built table.
    #[error("sstable is already built and immutable")]
    AlreadyBuilt,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Format(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests;
