//! The background compactor.
//!
//! A single dedicated thread wakes every merge interval, scans the layers
//! in order, and folds any over-capacity layer into the next one. Merge
//! errors are logged and the next tick retries; a still-over-capacity
//! layer stays eligible. The thread exits when the engine's shutdown
//! channel fires or disconnects, finishing an in-flight merge first.

use crate::chunk::{Chunk, ChunkData};
use crate::merge::MergeIterator;
use crate::{random_name, LsmInner, Result, RECORD_KIND_DELETE};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use sstable::SSTableBuilder;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

impl LsmInner {
    pub(crate) fn spawn_compactor(
        self: &Arc<Self>,
        shutdown: Receiver<()>,
        interval: Duration,
    ) -> io::Result<JoinHandle<()>> {
        let inner = Arc::clone(self);
        thread::Builder::new()
            .name("strata-compactor".to_string())
            .spawn(move || inner.compactor_loop(shutdown, interval))
    }

    fn compactor_loop(&self, shutdown: Receiver<()>, interval: Duration) {
        loop {
            match shutdown.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {}
            }

            for idx in 0..self.layers.len() {
                let over_capacity = {
                    let layer = &self.layers[idx];
                    layer.max_chunks > 0 && layer.chunks.read().len() > layer.max_chunks
                };
                if over_capacity {
                    if let Err(e) = self.merge_layer(idx) {
                        error!(layer = idx, error = %e, "layer merge failed");
                    }
                }
            }
        }
    }

    /// Merges every chunk of layer `layer_idx` into a single new SSTable
    /// at the head of the next layer; the last layer folds into itself.
    ///
    /// An empty source layer is a no-op that touches neither the target
    /// nor the manifest. Source artifacts are deleted only after the
    /// manifest that no longer references them has been persisted.
    pub(crate) fn merge_layer(&self, layer_idx: usize) -> Result<()> {
        let started = Instant::now();

        let chunks: Vec<Arc<Chunk>> = self.layers[layer_idx].chunks.read().clone();
        if chunks.is_empty() {
            return Ok(());
        }

        let last_idx = self.layers.len() - 1;
        let target_idx = (layer_idx + 1).min(last_idx);
        // A tombstone may only be discarded when the merge covers every
        // chunk older than its output, which is exactly the bottom layer
        // folding into itself.
        let drop_tombstones = layer_idx == last_idx;

        debug!(
            layer = layer_idx,
            target = target_idx,
            chunks = chunks.len(),
            "merging layer"
        );

        let estimated: i64 = chunks.iter().map(|c| c.data.num_entries()).sum();
        let name = self.generate_chunk_name(target_idx);
        let mut builder = SSTableBuilder::new(estimated.max(0) as usize, &self.root_dir, &name)?;

        let mut inputs = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            inputs.push(chunk.data.iter());
        }
        let mut merged = MergeIterator::new(inputs)?;
        while let Some(entry) = merged.next_entry()? {
            if drop_tombstones && entry.kind == RECORD_KIND_DELETE {
                continue;
            }
            builder.write(&entry.key, entry.kind, &entry.value)?;
        }
        let table = builder.build()?;
        let new_chunk = Arc::new(Chunk {
            name,
            data: ChunkData::Table(table),
        });

        {
            let _structural = self.structural.lock();
            {
                let mut source = self.layers[layer_idx].chunks.write();
                // Remove exactly the chunks that were merged. A rotation
                // may have prepended a fresh chunk to layer 0 in the
                // meantime; it must survive.
                source.retain(|c| !chunks.iter().any(|m| Arc::ptr_eq(m, c)));
                if target_idx != layer_idx {
                    let mut target = self.layers[target_idx].chunks.write();
                    target.insert(0, new_chunk);
                } else {
                    source.insert(0, new_chunk);
                }
            }
            self.save_manifest()?;
        }

        for chunk in &chunks {
            if let Err(e) = chunk.data.delete() {
                warn!(chunk = %chunk.name, error = %e, "failed to delete merged chunk");
            }
        }

        info!(
            layer = layer_idx,
            target = target_idx,
            duration_ms = started.elapsed().as_millis() as u64,
            "merge complete"
        );
        Ok(())
    }

    /// A `layer-<idx>-<random>` name not already used in the target layer.
    fn generate_chunk_name(&self, layer_idx: usize) -> String {
        loop {
            let name = format!("layer-{}-{}", layer_idx, random_name(6));
            if !self.layer_has_chunk(layer_idx, &name) {
                return name;
            }
        }
    }

    fn layer_has_chunk(&self, layer_idx: usize, name: &str) -> bool {
        self.layers[layer_idx]
            .chunks
            .read()
            .iter()
            .any(|c| c.name == name)
    }
}
