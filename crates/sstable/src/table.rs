//! The immutable read side of a table.

use bloom::BloomFilter;
use byteorder::{BigEndian, ByteOrder};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::format::{
    artifact_path, SparseIndexEntry, TableMeta, BLOOM_EXT, DATA_ENTRY_HEADER, DATA_EXT,
    INDEX_ENTRY_HEADER, INDEX_ENTRY_TRAILER, INDEX_EXT, META_EXT, SPARSE_INDEX_EXT,
};
use crate::{Error, Result, SSTableIterator};

/// An immutable on-disk sorted run, open for reading.
///
/// The data and index files are memory-mapped; the bloom filter, sparse
/// index, and metadata live in memory. Point lookups touch at most one
/// sparse-index block of the mapped index plus one data entry.
pub struct SSTable {
    filter: BloomFilter,
    pub(crate) data: Mmap,
    pub(crate) index: Mmap,
    /// Anchors into the index file, ascending; the offset of each anchor is
    /// where the index entry for its key begins.
    sparse_index: Vec<SparseIndexEntry>,
    meta: TableMeta,
    root: PathBuf,
    name: String,
}

impl SSTable {
    /// Opens the five artifacts of the table named `name` under `root`.
    pub fn open(root: &Path, name: &str) -> Result<Self> {
        let mut bloom_file = File::open(artifact_path(root, name, BLOOM_EXT))?;
        let filter = BloomFilter::read_from(&mut bloom_file)?;

        let sparse_file = File::open(artifact_path(root, name, SPARSE_INDEX_EXT))?;
        let sparse_index: Vec<SparseIndexEntry> = serde_json::from_reader(sparse_file)?;

        let meta_file = File::open(artifact_path(root, name, META_EXT))?;
        let meta: TableMeta = serde_json::from_reader(meta_file)?;

        let data_file = File::open(artifact_path(root, name, DATA_EXT))?;
        let data = unsafe { Mmap::map(&data_file)? };
        let index_file = File::open(artifact_path(root, name, INDEX_EXT))?;
        let index = unsafe { Mmap::map(&index_file)? };

        Ok(Self {
            filter,
            data,
            index,
            sparse_index,
            meta,
            root: root.to_path_buf(),
            name: name.to_string(),
        })
    }

    /// Point lookup. Returns the record kind and value bytes when the key
    /// is present; tombstone interpretation is the caller's concern.
    pub fn read(&self, key: &str) -> Result<Option<(u64, Vec<u8>)>> {
        if self.sparse_index.is_empty() || !self.filter.may_contain(key.as_bytes()) {
            return Ok(None);
        }

        let (start, end) = self.index_range(key);
        self.scan_index(key.as_bytes(), start, end)
    }

    /// Narrows the index to the byte range that can contain `key`, by
    /// binary search over the sparse anchors.
    ///
    /// Keys at or past the last anchor map to the final block, which runs
    /// to the end of the index file. Otherwise the block of the largest
    /// anchor `<= key` is returned; keys below every anchor fall into the
    /// first block and simply scan past their miss.
    fn index_range(&self, key: &str) -> (usize, usize) {
        let anchors = &self.sparse_index;
        let last = &anchors[anchors.len() - 1];
        if last.key.as_str() <= key {
            return (last.offset as usize, self.index.len());
        }

        let after = anchors.partition_point(|a| a.key.as_str() <= key);
        let i = after.saturating_sub(1);
        let end = anchors
            .get(i + 1)
            .map(|a| a.offset as usize)
            .unwrap_or_else(|| self.index.len());
        (anchors[i].offset as usize, end)
    }

    /// Linearly scans index entries in `index[start..end)` for `key`,
    /// fetching the data entry on a hit.
    fn scan_index(&self, key: &[u8], start: usize, end: usize) -> Result<Option<(u64, Vec<u8>)>> {
        let block = self
            .index
            .get(start..end)
            .ok_or_else(|| Error::Format("sparse index points outside the index file".into()))?;

        let mut at = 0usize;
        while at < block.len() {
            let (kind, entry_key, data_offset, entry_len) = decode_index_entry(block, at)?;
            if entry_key == key {
                let value = self.fetch(data_offset as usize)?;
                return Ok(Some((kind, value)));
            }
            at += entry_len;
        }
        Ok(None)
    }

    /// Reads the data entry beginning at `offset`: one tag byte, an 8-byte
    /// length, then the value bytes.
    pub(crate) fn fetch(&self, offset: usize) -> Result<Vec<u8>> {
        let header = self
            .data
            .get(offset..offset + DATA_ENTRY_HEADER)
            .ok_or_else(|| Error::Format("data offset outside the data file".into()))?;
        // header[0] is the entry tag; only plain data entries exist today.
        let len = BigEndian::read_u64(&header[1..]) as usize;

        let value = self
            .data
            .get(offset + DATA_ENTRY_HEADER..offset + DATA_ENTRY_HEADER + len)
            .ok_or_else(|| Error::Format("truncated data entry".into()))?;
        Ok(value.to_vec())
    }

    /// Cursor over all entries in index order, starting before the first.
    pub fn iter(&self) -> SSTableIterator<'_> {
        SSTableIterator::new(self)
    }

    /// Length of the data file. Used for layer-size telemetry only.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Entry count recorded in the metadata artifact.
    pub fn num_entries(&self) -> i64 {
        self.meta.num_entries
    }

    /// Name the table was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Removes all five artifacts. The mappings stay valid until the table
    /// is dropped, so in-flight reads on other handles of `self` are
    /// unaffected by the unlink.
    pub fn delete(&self) -> Result<()> {
        let mut first_err: Option<io::Error> = None;
        for ext in [DATA_EXT, INDEX_EXT, SPARSE_INDEX_EXT, BLOOM_EXT, META_EXT] {
            if let Err(e) = fs::remove_file(artifact_path(&self.root, &self.name, ext)) {
                if e.kind() != io::ErrorKind::NotFound && first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e.into()),
        }
    }
}

/// Decodes the index entry starting at `at` in `block`, returning
/// `(kind, key bytes, data offset, total entry length)`.
pub(crate) fn decode_index_entry(block: &[u8], at: usize) -> Result<(u64, &[u8], u64, usize)> {
    let header = block
        .get(at..at + INDEX_ENTRY_HEADER)
        .ok_or_else(|| Error::Format("truncated index entry header".into()))?;
    let kind = BigEndian::read_u64(header);
    let key_len = BigEndian::read_u64(&header[8..]) as usize;

    let key_start = at + INDEX_ENTRY_HEADER;
    let key = block
        .get(key_start..key_start + key_len)
        .ok_or_else(|| Error::Format("truncated index entry key".into()))?;

    let offset_bytes = block
        .get(key_start + key_len..key_start + key_len + INDEX_ENTRY_TRAILER)
        .ok_or_else(|| Error::Format("truncated index entry offset".into()))?;
    let data_offset = BigEndian::read_u64(offset_bytes);

    Ok((
        kind,
        key,
        data_offset,
        INDEX_ENTRY_HEADER + key_len + INDEX_ENTRY_TRAILER,
    ))
}
