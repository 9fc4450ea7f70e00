use super::helpers::*;
use crate::chunk::ChunkData;
use crate::{Error, LsmTree, Options, RECORD_KIND_DELETE, RECORD_KIND_WRITE};
use anyhow::Result;
use sstable::SSTableBuilder;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

// --------------------- Manual merges ---------------------

#[test]
fn merge_layer_folds_layer_0_into_layer_1() -> Result<()> {
    let dir = tempdir()?;
    let tree = LsmTree::open_with(dir.path(), manual_options())?;

    fill_1k(&tree, 0, 25)?; // five rotations
    assert_eq!(layer_len(&tree, 0), 5);
    assert_eq!(wal_file_count(dir.path()), 6);

    tree.inner.merge_layer(0)?;

    assert_eq!(layer_len(&tree, 0), 0, "source layer should be empty");
    assert_eq!(layer_len(&tree, 1), 1, "target layer should gain one chunk");
    for i in 0..25 {
        assert!(tree.get(&key(i))?.is_some(), "{} lost in merge", key(i));
    }
    // The retired memtables' WALs are gone; only the live root's remains.
    assert_eq!(wal_file_count(dir.path()), 1);
    Ok(())
}

#[test]
fn merge_preserves_the_newest_version_of_each_key() -> Result<()> {
    let dir = tempdir()?;
    let tree = LsmTree::open_with(dir.path(), manual_options())?;

    tree.set("dup", &[b'o'; 1024])?;
    fill_1k(&tree, 0, 4)?;
    tree.set("dup", &[b'n'; 1024])?;
    fill_1k(&tree, 4, 4)?;
    assert_eq!(layer_len(&tree, 0), 2);

    tree.inner.merge_layer(0)?;

    assert_eq!(tree.get("dup")?, Some(vec![b'n'; 1024]));
    tree.inner.merge_layer(1)?;
    assert_eq!(tree.get("dup")?, Some(vec![b'n'; 1024]));
    Ok(())
}

#[test]
fn merging_an_empty_layer_is_a_noop() -> Result<()> {
    let dir = tempdir()?;
    let tree = LsmTree::open_with(dir.path(), manual_options())?;
    tree.set("k", b"v")?;

    let manifest_before = fs::read_to_string(dir.path().join("lsm.json"))?;
    tree.inner.merge_layer(2)?;

    assert_eq!(layer_len(&tree, 2), 0);
    assert_eq!(layer_len(&tree, 3), 0, "target must be untouched");
    let manifest_after = fs::read_to_string(dir.path().join("lsm.json"))?;
    assert_eq!(manifest_before, manifest_after, "manifest must be untouched");
    Ok(())
}

#[test]
fn tombstones_survive_intermediate_merges() -> Result<()> {
    let dir = tempdir()?;
    let tree = LsmTree::open_with(dir.path(), manual_options())?;

    tree.set("k", &[b'x'; 1024])?;
    fill_1k(&tree, 0, 4)?; // k's value in an older layer-0 chunk
    tree.delete("k")?;
    fill_1k(&tree, 4, 5)?; // tombstone in a newer layer-0 chunk
    assert_eq!(layer_len(&tree, 0), 2);

    tree.inner.merge_layer(0)?;

    assert_eq!(tree.get("k")?, None, "deletion must survive compaction");
    let chunks = tree.inner.layers[1].chunks.read();
    let (kind, _) = chunks[0].data.get("k")?.expect("merged table must hold the tombstone");
    assert_eq!(kind, RECORD_KIND_DELETE);
    Ok(())
}

#[test]
fn bottom_layer_fold_drops_tombstones() -> Result<()> {
    let dir = tempdir()?;
    let tree = LsmTree::open_with(dir.path(), manual_options())?;

    // A value, pushed all the way to the bottom layer.
    tree.set("gone", &[b'g'; 1024])?;
    fill_1k(&tree, 0, 4)?;
    tree.inner.merge_layer(0)?;
    tree.inner.merge_layer(1)?;
    tree.inner.merge_layer(2)?;
    assert_eq!(layer_len(&tree, 3), 1);

    // Its tombstone, pushed down on top of it.
    tree.delete("gone")?;
    fill_1k(&tree, 4, 5)?;
    tree.inner.merge_layer(0)?;
    tree.inner.merge_layer(1)?;
    tree.inner.merge_layer(2)?;
    assert_eq!(layer_len(&tree, 3), 2);
    assert_eq!(tree.get("gone")?, None);

    // Folding the bottom layer into itself covers everything older, so the
    // tombstone itself can finally go.
    tree.inner.merge_layer(3)?;
    assert_eq!(layer_len(&tree, 3), 1);
    assert_eq!(tree.get("gone")?, None);
    {
        let chunks = tree.inner.layers[3].chunks.read();
        assert!(
            chunks[0].data.get("gone")?.is_none(),
            "tombstone should be dropped by the bottom-layer fold"
        );
    }
    for i in 0..9 {
        assert!(tree.get(&key(i))?.is_some());
    }
    Ok(())
}

// --------------------- Background compactor ---------------------

#[test]
fn background_compactor_merges_an_over_capacity_layer() -> Result<()> {
    let dir = tempdir()?;
    let tree = LsmTree::open_with(
        dir.path(),
        Options {
            max_root_chunk_size: 4 * 1024,
            merge_interval: Duration::from_millis(100),
            wal_sync: false,
        },
    )?;

    fill_1k(&tree, 0, 25)?; // five rotations, one over layer 0's capacity of 4

    let deadline = Instant::now() + Duration::from_secs(20);
    while layer_len(&tree, 0) > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }

    assert_eq!(layer_len(&tree, 0), 0, "compactor should have emptied layer 0");
    assert_eq!(layer_len(&tree, 1), 1);
    for i in 0..25 {
        assert!(tree.get(&key(i))?.is_some());
    }
    assert_eq!(wal_file_count(dir.path()), 1);

    tree.close()?;
    Ok(())
}

#[test]
fn close_stops_the_compactor() -> Result<()> {
    let dir = tempdir()?;
    let tree = LsmTree::open_with(
        dir.path(),
        Options {
            max_root_chunk_size: 4 * 1024,
            merge_interval: Duration::from_millis(50),
            wal_sync: false,
        },
    )?;
    fill_1k(&tree, 0, 10)?;

    tree.close()?;
    tree.close()?; // idempotent

    // The tree still answers reads after shutdown.
    for i in 0..10 {
        assert!(tree.get(&key(i))?.is_some());
    }
    Ok(())
}

// --------------------- Chunk dispatch ---------------------

#[test]
fn writing_to_a_table_chunk_is_unsupported() -> Result<()> {
    let dir = tempdir()?;
    let mut builder = SSTableBuilder::new(1, dir.path(), "tbl")?;
    builder.write("a", RECORD_KIND_WRITE, b"v")?;
    let chunk = ChunkData::Table(builder.build()?);

    assert!(matches!(
        chunk.set("b", RECORD_KIND_WRITE, b"v"),
        Err(Error::Unsupported)
    ));
    Ok(())
}
