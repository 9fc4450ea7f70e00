//! # Bloom filter
//!
//! Probabilistic set membership used to skip tables that certainly do not
//! contain a key. A negative answer is authoritative; a positive answer is
//! wrong with a rate bounded by the construction-time target.
//!
//! Every SSTable persists one of these as its `.bloom` artifact, so the
//! serialization must round-trip bit for bit: [`BloomFilter::write_to`]
//! followed by [`BloomFilter::read_from`] reproduces the exact filter
//! state.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use xxhash_rust::xxh64::xxh64;

/// Seeds for the two independent base hashes of the double-hashing scheme.
const SEED_LO: u64 = 0x9e37_79b9_7f4a_7c15;
const SEED_HI: u64 = 0xc2b2_ae3d_27d4_eb4f;

/// Upper bound accepted when deserializing, so a corrupt length field
/// cannot ask for an absurd allocation.
const MAX_FILTER_BYTES: u64 = 64 * 1024 * 1024;

/// A bit-vector bloom filter with `k` derived hash functions.
///
/// Hashing is double hashing over two seeded xxh64 values:
/// `h(i) = h1 + i * h2 (mod m)`.
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Sizes a filter for `expected_items` entries at the given target
    /// false-positive rate.
    ///
    /// Uses the standard optimums `m = -n·ln(p) / ln(2)²` and
    /// `k = (m/n)·ln(2)`. A zero estimate is bumped to one so an empty
    /// table still produces a loadable artifact.
    ///
    /// # Panics
    ///
    /// Panics if `false_positive_rate` is outside `(0, 1)`.
    pub fn with_estimates(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );
        let n = expected_items.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;

        let m = ((-n * false_positive_rate.ln()) / (ln2 * ln2)).ceil().max(8.0) as u64;
        let k = (((m as f64) / n) * ln2).ceil().max(1.0) as u32;

        Self {
            bits: vec![0u8; ((m + 7) / 8) as usize],
            num_bits: m,
            num_hashes: k,
        }
    }

    /// Marks `key` as present.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = base_hashes(key);
        for i in 0..u64::from(self.num_hashes) {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    /// Returns `false` only when `key` was definitely never inserted.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = base_hashes(key);
        (0..u64::from(self.num_hashes)).all(|i| {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
            self.bits[(bit / 8) as usize] & (1 << (bit % 8)) != 0
        })
    }

    /// Number of bits in the filter.
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Number of derived hash functions.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Serializes the filter.
    ///
    /// Wire format, big-endian:
    /// `[num_bits: u64][num_hashes: u32][bits.len(): u64][bits]`
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<BigEndian>(self.num_bits)?;
        w.write_u32::<BigEndian>(self.num_hashes)?;
        w.write_u64::<BigEndian>(self.bits.len() as u64)?;
        w.write_all(&self.bits)
    }

    /// Reads back a filter serialized by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let num_bits = r.read_u64::<BigEndian>()?;
        let num_hashes = r.read_u32::<BigEndian>()?;
        let len = r.read_u64::<BigEndian>()?;

        let min_len = num_bits.checked_add(7).map(|v| v / 8);
        if num_bits == 0
            || num_hashes == 0
            || len > MAX_FILTER_BYTES
            || min_len.map_or(true, |min_len| len < min_len)
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bloom filter header is inconsistent",
            ));
        }

        let mut bits = vec![0u8; len as usize];
        r.read_exact(&mut bits)?;
        Ok(Self {
            bits,
            num_bits,
            num_hashes,
        })
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .finish()
    }
}

fn base_hashes(key: &[u8]) -> (u64, u64) {
    (xxh64(key, SEED_LO), xxh64(key, SEED_HI))
}
