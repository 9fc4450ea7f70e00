use crate::chunk::ChunkIterator;
use crate::memtable::MemtableChunk;
use crate::merge::MergeIterator;
use crate::{RECORD_KIND_DELETE, RECORD_KIND_WRITE};
use anyhow::Result;
use std::path::Path;
use tempfile::tempdir;

fn mem_chunk(dir: &Path, name: &str, entries: &[(&str, &str)]) -> Result<MemtableChunk> {
    let chunk = MemtableChunk::open(dir, name, false)?;
    for (k, v) in entries {
        chunk.set(k, RECORD_KIND_WRITE, v.as_bytes())?;
    }
    Ok(chunk)
}

fn collect(mut merged: MergeIterator<'_>) -> Result<Vec<(String, Vec<u8>)>> {
    let mut out = Vec::new();
    while let Some(e) = merged.next_entry()? {
        out.push((e.key, e.value));
    }
    Ok(out)
}

#[test]
fn newest_input_wins_on_duplicate_keys() -> Result<()> {
    let dir = tempdir()?;
    let newer = mem_chunk(dir.path(), "newer", &[("a", "1"), ("c", "3")])?;
    let older = mem_chunk(dir.path(), "older", &[("a", "9"), ("b", "2")])?;

    let merged = MergeIterator::new(vec![
        ChunkIterator::Memtable(newer.iter()),
        ChunkIterator::Memtable(older.iter()),
    ])?;

    assert_eq!(
        collect(merged)?,
        vec![
            ("a".to_string(), b"1".to_vec()),
            ("b".to_string(), b"2".to_vec()),
            ("c".to_string(), b"3".to_vec()),
        ]
    );
    Ok(())
}

#[test]
fn output_is_ascending_and_duplicate_free() -> Result<()> {
    let dir = tempdir()?;
    let one = mem_chunk(dir.path(), "one", &[("b", "1"), ("d", "1"), ("f", "1")])?;
    let two = mem_chunk(dir.path(), "two", &[("a", "2"), ("d", "2"), ("e", "2")])?;
    let three = mem_chunk(dir.path(), "three", &[("a", "3"), ("c", "3"), ("f", "3")])?;

    let merged = MergeIterator::new(vec![
        ChunkIterator::Memtable(one.iter()),
        ChunkIterator::Memtable(two.iter()),
        ChunkIterator::Memtable(three.iter()),
    ])?;
    let out = collect(merged)?;

    let keys: Vec<&str> = out.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["a", "b", "c", "d", "e", "f"]);

    // Each key's value comes from the smallest-indexed input holding it.
    let lookup = |k: &str| -> &[u8] { &out.iter().find(|(key, _)| key == k).unwrap().1 };
    assert_eq!(lookup("a"), b"2");
    assert_eq!(lookup("d"), b"1");
    assert_eq!(lookup("f"), b"1");
    Ok(())
}

#[test]
fn tombstones_are_emitted_verbatim() -> Result<()> {
    let dir = tempdir()?;
    let newer = MemtableChunk::open(dir.path(), "newer", false)?;
    newer.set("k", RECORD_KIND_DELETE, b"")?;
    let older = mem_chunk(dir.path(), "older", &[("k", "old-value")])?;

    let mut merged = MergeIterator::new(vec![
        ChunkIterator::Memtable(newer.iter()),
        ChunkIterator::Memtable(older.iter()),
    ])?;

    let entry = merged.next_entry()?.expect("one merged entry");
    assert_eq!(entry.key, "k");
    assert_eq!(entry.kind, RECORD_KIND_DELETE, "the tombstone is the newest version");
    assert!(merged.next_entry()?.is_none());
    Ok(())
}

#[test]
fn empty_inputs_are_skipped() -> Result<()> {
    let dir = tempdir()?;
    let empty = MemtableChunk::open(dir.path(), "empty", false)?;
    let full = mem_chunk(dir.path(), "full", &[("a", "1"), ("b", "2")])?;

    let merged = MergeIterator::new(vec![
        ChunkIterator::Memtable(empty.iter()),
        ChunkIterator::Memtable(full.iter()),
    ])?;

    assert_eq!(collect(merged)?.len(), 2);
    Ok(())
}

#[test]
fn no_inputs_is_an_empty_stream() -> Result<()> {
    let mut merged = MergeIterator::new(Vec::new())?;
    assert!(merged.next_entry()?.is_none());
    Ok(())
}
