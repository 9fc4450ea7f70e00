//! # Skiplist: the ordered in-memory map
//!
//! A probabilistic ordered map over totally-ordered keys. Entries are kept
//! in ascending key order across a tower of linked levels; each entry joins
//! level `n + 1` with probability 0.5, giving O(log n) expected search and
//! insert while iteration walks the bottom level like a plain sorted list.
//!
//! This is the mutable half of the storage engine's memtable: the write path
//! upserts into it, the read path probes it before touching any table on
//! disk, and a retiring memtable is drained through [`SkipList::iter`] in
//! key order.
//!
//! ## Representation
//!
//! Nodes live in an arena `Vec` and link to each other through plain
//! `usize` indices, one forward index per level. Nothing is ever removed
//! from the arena (the engine retires whole memtables instead of deleting
//! individual keys), so indices stay stable for the life of the list and no
//! unsafe pointer juggling is needed.
//!
//! ## Concurrency
//!
//! Every operation is serialized through an internal reader-writer lock:
//! readers share, writers exclude. [`SkipList::iter`] holds the read lock
//! for the lifetime of the iterator, so an iteration observes a consistent
//! snapshot but cannot be restarted without reacquiring the lock.

use parking_lot::{RwLock, RwLockReadGuard};
use rand::Rng;

/// Probability that an entry present on level `n` also joins level `n + 1`.
const RISE_PROBABILITY: f32 = 0.5;

struct Node<K, V> {
    key: K,
    value: V,
    /// Forward link per level this node participates in. `None` is the end
    /// of the level.
    next: Vec<Option<usize>>,
}

struct Inner<K, V> {
    /// Arena of all nodes ever inserted; links index into this.
    nodes: Vec<Node<K, V>>,
    /// Head forward links, one per level. `head[0]` is the smallest key.
    head: Vec<Option<usize>>,
    len: usize,
}

/// A probabilistic ordered map.
///
/// `max_levels` bounds the height of the level tower and is fixed at
/// construction. All operations take `&self`; see the module docs for the
/// locking contract.
pub struct SkipList<K, V> {
    inner: RwLock<Inner<K, V>>,
    max_levels: usize,
}

impl<K: Ord, V> SkipList<K, V> {
    /// Creates an empty list with the given maximum number of levels.
    ///
    /// # Panics
    ///
    /// Panics if `max_levels` is zero.
    pub fn new(max_levels: usize) -> Self {
        assert!(max_levels > 0, "skiplist needs at least one level");
        Self {
            inner: RwLock::new(Inner {
                nodes: Vec::new(),
                head: vec![None; max_levels],
                len: 0,
            }),
            max_levels,
        }
    }

    /// Inserts `key`, or overwrites the entry if the key is already
    /// present. Returns the previous value on overwrite, `None` otherwise.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut inner = self.inner.write();

        // Walk down the tower recording the predecessor at every level.
        // `None` stands for the head sentinel.
        let mut update: Vec<Option<usize>> = vec![None; self.max_levels];
        let mut at: Option<usize> = None;
        for level in (0..self.max_levels).rev() {
            loop {
                let next = match at {
                    None => inner.head[level],
                    Some(i) => inner.nodes[i].next[level],
                };
                match next {
                    Some(n) if inner.nodes[n].key < key => at = Some(n),
                    _ => break,
                }
            }
            update[level] = at;
        }

        let candidate = match at {
            None => inner.head[0],
            Some(i) => inner.nodes[i].next[0],
        };
        if let Some(c) = candidate {
            if inner.nodes[c].key == key {
                return Some(std::mem::replace(&mut inner.nodes[c].value, value));
            }
        }

        let levels = self.random_levels();
        let idx = inner.nodes.len();
        let mut next = vec![None; levels];
        for (level, slot) in next.iter_mut().enumerate() {
            match update[level] {
                None => {
                    *slot = inner.head[level];
                    inner.head[level] = Some(idx);
                }
                Some(p) => {
                    *slot = inner.nodes[p].next[level];
                    inner.nodes[p].next[level] = Some(idx);
                }
            }
        }
        inner.nodes.push(Node { key, value, next });
        inner.len += 1;
        None
    }

    /// Returns a clone of the value stored under `key`.
    ///
    /// The key may be any borrowed form of `K`, as with the standard
    /// ordered maps.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Ord + ?Sized,
        V: Clone,
    {
        let inner = self.inner.read();

        let mut at: Option<usize> = None;
        for level in (0..self.max_levels).rev() {
            loop {
                let next = match at {
                    None => inner.head[level],
                    Some(i) => inner.nodes[i].next[level],
                };
                match next {
                    Some(n) if inner.nodes[n].key.borrow() < key => at = Some(n),
                    _ => break,
                }
            }
        }

        let candidate = match at {
            None => inner.head[0],
            Some(i) => inner.nodes[i].next[0],
        };
        candidate
            .filter(|&c| inner.nodes[c].key.borrow() == key)
            .map(|c| inner.nodes[c].value.clone())
    }

    /// Number of entries currently in the list.
    pub fn len(&self) -> usize {
        self.inner.read().len
    }

    /// Whether the list contains no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over all entries in strictly ascending key order, starting
    /// at the smallest key.
    ///
    /// The iterator holds the list's read lock until it is dropped; inserts
    /// block for as long as it is alive.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let guard = self.inner.read();
        let first = guard.head[0];
        Iter { guard, at: first }
    }

    fn random_levels(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut levels = 1;
        while levels < self.max_levels && rng.gen::<f32>() < RISE_PROBABILITY {
            levels += 1;
        }
        levels
    }
}

/// Snapshot iterator over a [`SkipList`], yielding cloned `(key, value)`
/// pairs in ascending key order.
pub struct Iter<'a, K, V> {
    guard: RwLockReadGuard<'a, Inner<K, V>>,
    at: Option<usize>,
}

impl<K: Clone, V: Clone> Iterator for Iter<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        let idx = self.at?;
        let node = &self.guard.nodes[idx];
        let item = (node.key.clone(), node.value.clone());
        self.at = node.next[0];
        Some(item)
    }
}
