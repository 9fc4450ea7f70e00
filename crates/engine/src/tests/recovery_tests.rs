use super::helpers::*;
use crate::LsmTree;
use anyhow::Result;
use tempfile::tempdir;

#[test]
fn reopen_replays_the_wal() -> Result<()> {
    let dir = tempdir()?;
    {
        let tree = LsmTree::open_with(dir.path(), manual_options())?;
        tree.set("k", b"v1")?;
        tree.close()?;
    }

    let tree = LsmTree::open_with(dir.path(), manual_options())?;
    assert_eq!(tree.get("k")?, Some(b"v1".to_vec()));
    assert_eq!(root_entries(&tree), 1);
    Ok(())
}

#[test]
fn replay_restores_the_advisory_size() -> Result<()> {
    let dir = tempdir()?;
    {
        let tree = LsmTree::open_with(dir.path(), manual_options())?;
        fill_1k(&tree, 0, 3)?;
        tree.close()?;
    }

    let tree = LsmTree::open_with(dir.path(), manual_options())?;
    assert_eq!(tree.inner.root.read().data.size(), 3 * 1024);

    // The restored counter keeps driving rotation.
    fill_1k(&tree, 3, 2)?;
    assert_eq!(layer_len(&tree, 0), 1);
    Ok(())
}

#[test]
fn reopen_recovers_rotated_and_merged_state() -> Result<()> {
    let dir = tempdir()?;
    {
        let tree = LsmTree::open_with(dir.path(), manual_options())?;
        fill_1k(&tree, 0, 25)?;
        tree.inner.merge_layer(0)?; // 25 keys now in a layer-1 table
        tree.set("fresh", b"wal-only")?; // lives only in the root WAL
        tree.close()?;
    }

    let tree = LsmTree::open_with(dir.path(), manual_options())?;
    for i in 0..25 {
        assert!(tree.get(&key(i))?.is_some(), "{} lost across reopen", key(i));
    }
    assert_eq!(tree.get("fresh")?, Some(b"wal-only".to_vec()));
    assert_eq!(layer_len(&tree, 1), 1);
    Ok(())
}

#[test]
fn tombstones_recover_from_the_wal() -> Result<()> {
    let dir = tempdir()?;
    {
        let tree = LsmTree::open_with(dir.path(), manual_options())?;
        tree.set("k", b"v")?;
        tree.delete("k")?;
        tree.close()?;
    }

    let tree = LsmTree::open_with(dir.path(), manual_options())?;
    assert_eq!(tree.get("k")?, None, "tombstone must replay from the WAL");
    Ok(())
}

#[test]
fn reopen_without_shutdown_recovers() -> Result<()> {
    let dir = tempdir()?;
    {
        let tree = LsmTree::open_with(dir.path(), manual_options())?;
        fill_1k(&tree, 0, 7)?;
        tree.set("latest", b"x")?;
        // Simulate a crash: the engine is never closed or dropped, so
        // nothing gets flushed beyond what the WAL and manifest already
        // hold. (The leaked compactor sleeps for an hour; harmless.)
        std::mem::forget(tree);
    }

    let tree = LsmTree::open_with(dir.path(), manual_options())?;
    for i in 0..7 {
        assert!(tree.get(&key(i))?.is_some());
    }
    assert_eq!(tree.get("latest")?, Some(b"x".to_vec()));
    Ok(())
}

#[test]
fn recovered_tree_keeps_accepting_writes() -> Result<()> {
    let dir = tempdir()?;
    {
        let tree = LsmTree::open_with(dir.path(), manual_options())?;
        fill_1k(&tree, 0, 5)?;
        tree.close()?;
    }

    let tree = LsmTree::open_with(dir.path(), manual_options())?;
    fill_1k(&tree, 5, 10)?;
    for i in 0..15 {
        assert!(tree.get(&key(i))?.is_some());
    }
    Ok(())
}
