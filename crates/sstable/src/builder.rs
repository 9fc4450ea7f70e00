//! Streaming construction of a new table.

use bloom::BloomFilter;
use byteorder::{BigEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::format::{
    artifact_path, SparseIndexEntry, TableMeta, BLOOM_EXT, BLOOM_FALSE_POSITIVE_RATE, DATA_ENTRY_TAG,
    DATA_EXT, INDEX_EXT, META_EXT, SPARSE_INDEX_BLOCK_SIZE, SPARSE_INDEX_EXT,
};
use crate::{Error, Result, SSTable};

/// Builds a new SSTable by streaming entries in ascending key order.
///
/// Entries are appended with [`write`](Self::write) and the table is
/// finalized with [`build`](Self::build), which persists every artifact and
/// reopens the result as an immutable [`SSTable`]. A builder that has been
/// built rejects further use.
///
/// The data and index streams are written through buffered writers; the
/// bloom filter and sparse index accumulate in memory and are only
/// persisted at build time.
pub struct SSTableBuilder {
    filter: BloomFilter,
    data: BufWriter<File>,
    /// Byte position in the data stream where the next entry begins.
    data_pos: u64,
    index: BufWriter<File>,
    /// Byte position in the index stream where the next entry begins.
    index_pos: u64,
    sparse_index: Vec<SparseIndexEntry>,
    /// Bytes of index stream tolerated before a new sparse anchor.
    sparse_block_size: u64,
    built: bool,
    /// Most recently written key, for order enforcement.
    previous_key: String,
    num_entries: i64,
    root: PathBuf,
    name: String,
}

impl SSTableBuilder {
    /// Opens the data and index files for a table named `name` under
    /// `root`. `estimated_entries` sizes the bloom filter for the target
    /// false-positive rate of 0.01.
    pub fn new(estimated_entries: usize, root: &Path, name: &str) -> Result<Self> {
        let data = File::create(artifact_path(root, name, DATA_EXT))?;
        let index = File::create(artifact_path(root, name, INDEX_EXT))?;

        Ok(Self {
            filter: BloomFilter::with_estimates(estimated_entries, BLOOM_FALSE_POSITIVE_RATE),
            data: BufWriter::new(data),
            data_pos: 0,
            index: BufWriter::new(index),
            index_pos: 0,
            sparse_index: Vec::new(),
            sparse_block_size: SPARSE_INDEX_BLOCK_SIZE,
            built: false,
            previous_key: String::new(),
            num_entries: 0,
            root: root.to_path_buf(),
            name: name.to_string(),
        })
    }

    /// Appends one entry. Keys must arrive in ascending order.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyBuilt`] after [`build`](Self::build);
    /// [`Error::OrderViolation`] when `key` sorts before the previous key.
    pub fn write(&mut self, key: &str, kind: u64, value: &[u8]) -> Result<()> {
        if self.built {
            return Err(Error::AlreadyBuilt);
        }
        if self.previous_key.as_str() > key {
            return Err(Error::OrderViolation);
        }
        self.previous_key.clear();
        self.previous_key.push_str(key);

        // The first entry always gets an anchor, pinning the sparse index
        // to offset 0.
        if self.bytes_since_last_anchor() >= self.sparse_block_size {
            self.sparse_index.push(SparseIndexEntry {
                key: key.to_string(),
                offset: self.index_pos,
            });
        }

        self.index.write_u64::<BigEndian>(kind)?;
        self.index.write_u64::<BigEndian>(key.len() as u64)?;
        self.index.write_all(key.as_bytes())?;
        self.index.write_u64::<BigEndian>(self.data_pos)?;
        self.index_pos += (8 + 8 + key.len() + 8) as u64;

        self.data.write_u8(DATA_ENTRY_TAG)?;
        self.data.write_u64::<BigEndian>(value.len() as u64)?;
        self.data.write_all(value)?;
        self.data_pos += (1 + 8 + value.len()) as u64;

        self.filter.insert(key.as_bytes());
        self.num_entries += 1;
        Ok(())
    }

    /// Persists the bloom filter, sparse index, and metadata, flushes and
    /// syncs the data and index streams, and reopens everything as an
    /// immutable [`SSTable`].
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyBuilt`] on a second build.
    pub fn build(&mut self) -> Result<SSTable> {
        if self.built {
            return Err(Error::AlreadyBuilt);
        }

        self.save_bloom_filter()?;
        self.save_sparse_index()?;
        self.save_metadata()?;

        self.data.flush()?;
        self.index.flush()?;
        self.data.get_ref().sync_all()?;
        self.index.get_ref().sync_all()?;

        self.built = true;

        SSTable::open(&self.root, &self.name)
    }

    /// Distance from the last sparse anchor to the current index position.
    /// Reports a full block when no anchor exists yet, forcing one at the
    /// first write.
    fn bytes_since_last_anchor(&self) -> u64 {
        match self.sparse_index.last() {
            None => self.sparse_block_size,
            Some(anchor) => self.index_pos - anchor.offset,
        }
    }

    fn save_bloom_filter(&self) -> Result<()> {
        let mut file = File::create(artifact_path(&self.root, &self.name, BLOOM_EXT))?;
        self.filter.write_to(&mut file)?;
        Ok(())
    }

    fn save_sparse_index(&self) -> Result<()> {
        let file = File::create(artifact_path(&self.root, &self.name, SPARSE_INDEX_EXT))?;
        serde_json::to_writer(file, &self.sparse_index)?;
        Ok(())
    }

    fn save_metadata(&self) -> Result<()> {
        let file = File::create(artifact_path(&self.root, &self.name, META_EXT))?;
        serde_json::to_writer(
            file,
            &TableMeta {
                num_entries: self.num_entries,
            },
        )?;
        Ok(())
    }
}
