//! The persisted tree descriptor, `lsm.json`.
//!
//! One JSON document naming the root chunk, every layer with its capacity,
//! and every layer's chunks newest first with their kinds:
//!
//! ```json
//! {"Layers":[{"Name":"layer-0","MaxChunks":4,"Chunks":[
//!     {"Name":"q3x7ab","ChunkType":1}]} ,…],
//!  "Root":{"Name":"k9m2pz","ChunkType":1},
//!  "MaxRootChunkSize":16777216}
//! ```
//!
//! Saves are atomic: the document is written to `lsm.json.tmp`, fsynced,
//! and renamed over the manifest, so a crash mid-save leaves the previous
//! committed state readable.

use crate::chunk::Chunk;
use crate::{Error, Layer, LsmInner, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

pub(crate) const MANIFEST_FILENAME: &str = "lsm.json";
const MANIFEST_TMP_FILENAME: &str = "lsm.json.tmp";

/// A chunk reference: its name and its kind (1 = memtable, 2 = sstable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ManifestChunk {
    pub(crate) name: String,
    pub(crate) chunk_type: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ManifestLayer {
    pub(crate) name: String,
    pub(crate) max_chunks: usize,
    pub(crate) chunks: Vec<ManifestChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Manifest {
    pub(crate) layers: Vec<ManifestLayer>,
    pub(crate) root: ManifestChunk,
    pub(crate) max_root_chunk_size: u64,
}

impl Manifest {
    /// Captures the tree's current topology. The caller holds the
    /// structural mutex; the root and layer locks are taken one at a time
    /// here.
    pub(crate) fn snapshot(inner: &LsmInner) -> Manifest {
        let root = {
            let root = inner.root.read();
            describe(&root)
        };

        let layers = inner
            .layers
            .iter()
            .map(|layer: &Layer| ManifestLayer {
                name: layer.name.clone(),
                max_chunks: layer.max_chunks,
                chunks: layer.chunks.read().iter().map(|c| describe(c)).collect(),
            })
            .collect();

        Manifest {
            layers,
            root,
            max_root_chunk_size: inner.max_root_chunk_size,
        }
    }

    /// Writes the manifest under `root_dir` via temp file + fsync +
    /// rename.
    pub(crate) fn save(&self, root_dir: &Path) -> Result<()> {
        let tmp_path = root_dir.join(MANIFEST_TMP_FILENAME);
        {
            let mut file = File::create(&tmp_path)?;
            serde_json::to_writer(&mut file, self)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, root_dir.join(MANIFEST_FILENAME))?;
        Ok(())
    }

    /// Reads the manifest under `root_dir`. A missing file is
    /// [`Error::NotFound`], the signal that this is a first run.
    pub(crate) fn load(root_dir: &Path) -> Result<Manifest> {
        let file = match File::open(root_dir.join(MANIFEST_FILENAME)) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::NotFound),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_reader(file)?)
    }
}

fn describe(chunk: &Chunk) -> ManifestChunk {
    ManifestChunk {
        name: chunk.name.clone(),
        chunk_type: chunk.kind().as_u8(),
    }
}
