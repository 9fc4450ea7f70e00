//! # Engine: the strata LSM tree
//!
//! The coordinator that ties the [`skiplist`], [`wal`], and [`sstable`]
//! crates into a durable, ordered key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Caller
//!   |
//!   v
//! ┌──────────────────────────────────────────────────┐
//! │                   LSM TREE                       │
//! │                                                  │
//! │ set/delete → WAL append → skiplist upsert        │
//! │                 |                                │
//! │                 | (root over 16 MiB?)            │
//! │                 v                                │
//! │           rotate: root → head of layer-0,        │
//! │           fresh memtable installed, manifest     │
//! │           saved                                  │
//! │                                                  │
//! │ compactor (background thread, every 2 s):        │
//! │   layer over capacity → k-way merge all of its   │
//! │   chunks into one SSTable at the head of the     │
//! │   next layer, save manifest, delete sources      │
//! │                                                  │
//! │ get → memtable → layer-0 chunks (newest first)   │
//! │       → layer-1 → … → miss                       │
//! │       (first hit wins; tombstone = not found)    │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Layers
//!
//! A fresh tree has four layers, `layer-0` … `layer-3`, with capacities
//! 4, 8, 4, and unbounded. Within a layer chunks are ordered newest first
//! and may overlap; the newer chunk shadows the older, younger layers
//! shadow older layers, and the memtable shadows everything.
//!
//! ## Crash safety
//!
//! Every mutation reaches the root memtable's WAL before its skiplist. The
//! manifest (`lsm.json`) is rewritten, atomically via temp file + rename,
//! whenever the chunk topology changes, and source chunks are only deleted
//! after the manifest that no longer references them is durable. Reopening
//! a directory therefore reconstructs the tree as of the last manifest
//! save, with the current WAL replayed on top.

mod chunk;
mod compaction;
mod manifest;
mod memtable;
mod merge;

use chunk::{Chunk, ChunkData, ChunkKind};
use crossbeam_channel::Sender;
use manifest::Manifest;
use memtable::MemtableChunk;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use sstable::SSTable;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Record kind of a plain write.
pub const RECORD_KIND_WRITE: u64 = 0x1000;
/// Record kind of a tombstone. Reads treat it as "not found"; it shadows
/// any same-key write in a strictly older location.
pub const RECORD_KIND_DELETE: u64 = 0x1001;

/// Skiplist height of every memtable.
const MEMTABLE_MAX_LEVELS: usize = 16;

const KILOBYTE: u64 = 1024;
const MEGABYTE: u64 = 1024 * KILOBYTE;

/// Engine tuning knobs. [`Options::default`] matches the production
/// configuration; tests shrink the thresholds to force rotation and
/// compaction cheaply.
#[derive(Debug, Clone)]
pub struct Options {
    /// Memtable data size above which the root is rotated into layer 0.
    pub max_root_chunk_size: u64,
    /// Sleep between compactor scans of the layer list.
    pub merge_interval: Duration,
    /// Fsync every WAL append. Off by default; durability is then bounded
    /// by the OS write-back cache.
    pub wal_sync: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_root_chunk_size: 16 * MEGABYTE,
            merge_interval: Duration::from_secs(2),
            wal_sync: false,
        }
    }
}

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying read or write failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The manifest (or another artifact that should exist) is absent.
    /// During open this means "first run".
    #[error("not found")]
    NotFound,

    /// A persisted structure that does not decode.
    #[error("malformed artifact: {0}")]
    Format(String),

    /// A write was dispatched to a chunk kind that cannot accept one. The
    /// public API never produces this: only the root memtable takes
    /// writes.
    #[error("chunk kind does not support writes")]
    Unsupported,

    /// An error from the write-ahead log.
    #[error(transparent)]
    Wal(#[from] wal::WalError),

    /// An error from an SSTable.
    #[error(transparent)]
    Table(#[from] sstable::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Format(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A named bucket of chunks with a capacity. `max_chunks == 0` means the
/// layer is never over capacity (the bottom layer's terminus behavior).
pub(crate) struct Layer {
    pub(crate) name: String,
    pub(crate) max_chunks: usize,
    /// Chunks newest-first. Mutated only under this lock's write half,
    /// scanned under its read half.
    pub(crate) chunks: RwLock<Vec<Arc<Chunk>>>,
}

/// Shared engine state; the compactor thread and every `LsmTree` handle
/// operate through an `Arc` of this.
pub(crate) struct LsmInner {
    pub(crate) root_dir: PathBuf,
    pub(crate) max_root_chunk_size: u64,
    pub(crate) wal_sync: bool,
    /// The single writable chunk. Always a memtable.
    pub(crate) root: RwLock<Arc<Chunk>>,
    pub(crate) layers: Vec<Layer>,
    /// Serializes the two structural mutators (rotation and merge
    /// installation) and every manifest save. Whoever holds this may then
    /// take the root lock and layer locks it needs without risking a lock
    /// cycle, because readers only ever hold one lock at a time.
    pub(crate) structural: Mutex<()>,
}

/// An embedded LSM-tree key-value store rooted at a directory.
///
/// `set`, `delete`, and `get` take `&self` and may be called from multiple
/// threads; a dedicated background thread compacts over-full layers until
/// [`close`](LsmTree::close) (or drop) signals it to stop.
pub struct LsmTree {
    inner: Arc<LsmInner>,
    shutdown: Sender<()>,
    compactor: Mutex<Option<JoinHandle<()>>>,
}

impl LsmTree {
    /// Opens the tree at `root_dir` with default [`Options`], recovering
    /// from the manifest and WAL files when they exist and creating a
    /// fresh tree otherwise.
    pub fn open<P: AsRef<Path>>(root_dir: P) -> Result<LsmTree> {
        Self::open_with(root_dir, Options::default())
    }

    /// [`open`](LsmTree::open) with explicit options.
    pub fn open_with<P: AsRef<Path>>(root_dir: P, options: Options) -> Result<LsmTree> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root_dir)?;

        let inner = match Manifest::load(&root_dir) {
            Ok(m) => Arc::new(LsmInner::from_manifest(root_dir, &m, &options)?),
            Err(Error::NotFound) => {
                let inner = Arc::new(LsmInner::fresh(root_dir, &options)?);
                // Persist the fresh topology immediately so a reopen finds
                // the root chunk's WAL by name.
                inner.save_manifest()?;
                inner
            }
            Err(e) => return Err(e),
        };

        let (shutdown, signal) = crossbeam_channel::bounded(1);
        let compactor = inner.spawn_compactor(signal, options.merge_interval)?;

        Ok(LsmTree {
            inner,
            shutdown,
            compactor: Mutex::new(Some(compactor)),
        })
    }

    /// Stores `value` under `key`, overwriting any previous value.
    ///
    /// The write is appended to the memtable's WAL before it becomes
    /// visible. When the memtable's tracked size passes the rotation
    /// threshold it is pushed to the head of layer 0 and replaced by a
    /// fresh one, and the manifest is saved.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.write_record(key, RECORD_KIND_WRITE, value)
    }

    /// Removes `key` by writing a tombstone. The tombstone shadows older
    /// values in every layer until compaction retires it.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.write_record(key, RECORD_KIND_DELETE, &[])
    }

    fn write_record(&self, key: &str, kind: u64, value: &[u8]) -> Result<()> {
        let root = Arc::clone(&self.inner.root.read());
        root.data.set(key, kind, value)?;

        if root.data.size() > self.inner.max_root_chunk_size {
            self.inner.rotate_root()?;
        }
        Ok(())
    }

    /// Looks up `key`. Returns `Ok(None)` for a miss and for a key whose
    /// newest record is a tombstone.
    ///
    /// The memtable is consulted first, then each layer in order, each
    /// layer's chunks newest first; the first chunk that knows the key
    /// decides the answer.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let root = Arc::clone(&self.inner.root.read());
        if let Some((kind, data)) = root.data.get(key)? {
            return Ok((kind != RECORD_KIND_DELETE).then_some(data));
        }

        for layer in &self.inner.layers {
            let chunks = layer.chunks.read();
            for chunk in chunks.iter() {
                if let Some((kind, data)) = chunk.data.get(key)? {
                    return Ok((kind != RECORD_KIND_DELETE).then_some(data));
                }
            }
        }
        Ok(None)
    }

    /// Total chunk bytes per layer, youngest layer first. Diagnostic.
    pub fn layer_sizes(&self) -> Vec<u64> {
        self.inner
            .layers
            .iter()
            .map(|layer| layer.chunks.read().iter().map(|c| c.data.size()).sum())
            .collect()
    }

    /// Signals the compactor and waits for it to finish, draining any
    /// in-flight merge. Idempotent; also performed on drop.
    pub fn close(&self) -> Result<()> {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.compactor.lock().take() {
            handle
                .join()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "compactor thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for LsmTree {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.compactor.lock().take() {
            let _ = handle.join();
        }
    }
}

impl LsmInner {
    /// A brand-new tree: random-named empty root memtable, default layer
    /// configuration.
    fn fresh(root_dir: PathBuf, options: &Options) -> Result<Self> {
        let root_name = random_name(6);
        let root = Arc::new(Chunk {
            name: root_name.clone(),
            data: ChunkData::Memtable(MemtableChunk::open(
                &root_dir,
                &root_name,
                options.wal_sync,
            )?),
        });

        let layers = [("layer-0", 4), ("layer-1", 8), ("layer-2", 4), ("layer-3", 0)]
            .into_iter()
            .map(|(name, max_chunks)| Layer {
                name: name.to_string(),
                max_chunks,
                chunks: RwLock::new(Vec::new()),
            })
            .collect();

        Ok(Self {
            root_dir,
            max_root_chunk_size: options.max_root_chunk_size,
            wal_sync: options.wal_sync,
            root: RwLock::new(root),
            layers,
            structural: Mutex::new(()),
        })
    }

    /// Reconstructs a tree from its manifest. The root is always opened as
    /// a memtable, replaying its WAL if one exists, regardless of the
    /// recorded chunk type, which is informational for the root.
    fn from_manifest(root_dir: PathBuf, m: &Manifest, options: &Options) -> Result<Self> {
        let root = Arc::new(Chunk {
            name: m.root.name.clone(),
            data: ChunkData::Memtable(MemtableChunk::open(
                &root_dir,
                &m.root.name,
                options.wal_sync,
            )?),
        });

        let mut layers = Vec::with_capacity(m.layers.len());
        for layer in &m.layers {
            let mut chunks = Vec::with_capacity(layer.chunks.len());
            for c in &layer.chunks {
                let kind = ChunkKind::from_u8(c.chunk_type)
                    .ok_or_else(|| Error::Format(format!("unknown chunk type {}", c.chunk_type)))?;
                let data = match kind {
                    ChunkKind::Memtable => ChunkData::Memtable(MemtableChunk::open(
                        &root_dir,
                        &c.name,
                        options.wal_sync,
                    )?),
                    ChunkKind::Table => ChunkData::Table(SSTable::open(&root_dir, &c.name)?),
                };
                chunks.push(Arc::new(Chunk {
                    name: c.name.clone(),
                    data,
                }));
            }
            layers.push(Layer {
                name: layer.name.clone(),
                max_chunks: layer.max_chunks,
                chunks: RwLock::new(chunks),
            });
        }

        Ok(Self {
            root_dir,
            max_root_chunk_size: m.max_root_chunk_size,
            wal_sync: options.wal_sync,
            root: RwLock::new(root),
            layers,
            structural: Mutex::new(()),
        })
    }

    /// Retires the current root memtable to the head of layer 0 and
    /// installs a fresh one, then saves the manifest.
    pub(crate) fn rotate_root(&self) -> Result<()> {
        let _structural = self.structural.lock();
        {
            let mut root = self.root.write();
            // A racing writer may have rotated already; the fresh root
            // will be far under the threshold.
            if root.data.size() <= self.max_root_chunk_size {
                return Ok(());
            }

            debug!(chunk = %root.name, "root chunk full, rotating into layer 0");

            let fresh_name = random_name(6);
            let fresh = Arc::new(Chunk {
                name: fresh_name.clone(),
                data: ChunkData::Memtable(MemtableChunk::open(
                    &self.root_dir,
                    &fresh_name,
                    self.wal_sync,
                )?),
            });
            let retired = std::mem::replace(&mut *root, fresh);
            self.layers[0].chunks.write().insert(0, retired);
        }
        self.save_manifest()
    }

    /// Writes `lsm.json` to reflect the current topology. Callers hold the
    /// structural mutex; the root and layer locks are taken briefly here,
    /// one at a time.
    pub(crate) fn save_manifest(&self) -> Result<()> {
        Manifest::snapshot(self).save(&self.root_dir)
    }
}

/// Random lowercase-alphanumeric chunk name fragment.
pub(crate) fn random_name(len: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests;
