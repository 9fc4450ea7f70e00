use crate::{LsmTree, Options};
use anyhow::Result;
use std::path::Path;
use std::time::Duration;

/// Options that rotate after 4 KiB and leave the compactor effectively
/// asleep, so tests drive merges explicitly via `merge_layer`.
pub(crate) fn manual_options() -> Options {
    Options {
        max_root_chunk_size: 4 * 1024,
        merge_interval: Duration::from_secs(3600),
        wal_sync: false,
    }
}

pub(crate) fn key(i: u32) -> String {
    format!("key{:06}", i)
}

/// Writes `count` distinct keys with exactly-1-KiB values starting at
/// `start`. With [`manual_options`] every fifth KiB of values triggers a
/// rotation.
pub(crate) fn fill_1k(tree: &LsmTree, start: u32, count: u32) -> Result<()> {
    for i in start..start + count {
        tree.set(&key(i), &[b'v'; 1024])?;
    }
    Ok(())
}

pub(crate) fn layer_len(tree: &LsmTree, idx: usize) -> usize {
    tree.inner.layers[idx].chunks.read().len()
}

pub(crate) fn root_entries(tree: &LsmTree) -> i64 {
    tree.inner.root.read().data.num_entries()
}

/// Number of `wal-*.log` files in the tree's directory.
pub(crate) fn wal_file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("wal-"))
        .count()
}
