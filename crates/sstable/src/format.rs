//! Shared layout constants and the small JSON envelopes.
//!
//! Index entry, all integers big-endian:
//!
//! ```text
//! [kind: u64][key_len: u64][key bytes][data_offset: u64]
//! ```
//!
//! Data entry:
//!
//! ```text
//! [tag: u8 = 0x01][value_len: u64 BE][value bytes]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DATA_EXT: &str = ".data";
pub const INDEX_EXT: &str = ".index";
pub const SPARSE_INDEX_EXT: &str = ".spindex";
pub const BLOOM_EXT: &str = ".bloom";
pub const META_EXT: &str = ".meta";

/// Tag byte opening every data entry.
pub const DATA_ENTRY_TAG: u8 = 0x01;
/// Reserved for checksummed data entries. The current format never writes
/// it.
pub const CHECKSUM_ENTRY_TAG: u8 = 0x13;

/// Bytes of index stream tolerated between two sparse-index anchors.
pub const SPARSE_INDEX_BLOCK_SIZE: u64 = 8 * 1024;

/// Target false-positive rate for each table's bloom filter.
pub const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Fixed bytes of an index entry around the key: kind + key_len before it,
/// data_offset after it.
pub(crate) const INDEX_ENTRY_HEADER: usize = 8 + 8;
pub(crate) const INDEX_ENTRY_TRAILER: usize = 8;

/// Fixed bytes of a data entry before the value: tag + value_len.
pub(crate) const DATA_ENTRY_HEADER: usize = 1 + 8;

/// One sparse-index anchor: the key of an index entry and the byte offset
/// of that entry in the `.index` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseIndexEntry {
    #[serde(rename = "k")]
    pub key: String,
    #[serde(rename = "o")]
    pub offset: u64,
}

/// Contents of the `.meta` artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableMeta {
    pub num_entries: i64,
}

/// Path of one of the table's artifacts.
pub fn artifact_path(root: &Path, name: &str, ext: &str) -> PathBuf {
    root.join(format!("{name}{ext}"))
}
