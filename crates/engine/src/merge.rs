//! K-way ordered merge over chunk iterators.

use crate::chunk::ChunkIterator;
use crate::Result;

/// One record in a merge stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MergeEntry {
    pub(crate) kind: u64,
    pub(crate) key: String,
    pub(crate) value: Vec<u8>,
}

/// Merges N ascending chunk iterators into a single lazy ascending stream
/// that yields each distinct key once.
///
/// At every step the smallest-keyed head entry is emitted and its input
/// advanced; among inputs with equal heads the lowest input index wins.
/// After an emission, entries whose key equals the one just emitted are
/// suppressed. Compaction passes its inputs newest first, so the survivor
/// of each key is its newest version, tombstones included, which is what
/// keeps a deletion from resurrecting older values once its layer is
/// compacted away.
pub(crate) struct MergeIterator<'a> {
    inputs: Vec<ChunkIterator<'a>>,
    /// Current head entry per input; `None` when that input is exhausted.
    heads: Vec<Option<MergeEntry>>,
    last_key: Option<String>,
}

impl<'a> MergeIterator<'a> {
    pub(crate) fn new(mut inputs: Vec<ChunkIterator<'a>>) -> Result<Self> {
        let mut heads = Vec::with_capacity(inputs.len());
        for input in &mut inputs {
            heads.push(input.next_entry()?);
        }
        Ok(Self {
            inputs,
            heads,
            last_key: None,
        })
    }

    /// The next merged entry, or `None` when every input is exhausted.
    pub(crate) fn next_entry(&mut self) -> Result<Option<MergeEntry>> {
        loop {
            let Some(min) = self.min_head() else {
                return Ok(None);
            };

            let entry = self.heads[min].take().expect("min_head returned a live input");
            self.heads[min] = self.inputs[min].next_entry()?;

            // A key equal to the last emitted one is an older version of a
            // key already decided; drop it.
            if self.last_key.as_deref() == Some(entry.key.as_str()) {
                continue;
            }
            self.last_key = Some(entry.key.clone());
            return Ok(Some(entry));
        }
    }

    /// Index of the input whose head has the smallest key, preferring the
    /// lowest index on ties.
    fn min_head(&self) -> Option<usize> {
        let mut min: Option<usize> = None;
        for i in 0..self.heads.len() {
            let Some(candidate) = &self.heads[i] else {
                continue;
            };
            min = match min {
                None => Some(i),
                Some(m) => {
                    let current = self.heads[m].as_ref().expect("tracked min is live");
                    if candidate.key < current.key {
                        Some(i)
                    } else {
                        Some(m)
                    }
                }
            };
        }
        min
    }
}
