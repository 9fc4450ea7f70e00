//! Forward cursor over a table's index.

use crate::table::decode_index_entry;
use crate::{Error, Result, SSTable};

/// Streams a table's entries in index order, which is ascending key order.
///
/// The cursor starts before the first entry; each call to
/// [`next_entry`](Self::next_entry) decodes one index entry, fetches its
/// value from the data file, and advances. The stream ends when the cursor
/// reaches the end of the index file.
pub struct SSTableIterator<'a> {
    table: &'a SSTable,
    next_offset: usize,
}

impl<'a> SSTableIterator<'a> {
    pub(crate) fn new(table: &'a SSTable) -> Self {
        Self {
            table,
            next_offset: 0,
        }
    }

    /// Returns the next `(kind, key, value)`, or `None` at end of stream.
    pub fn next_entry(&mut self) -> Result<Option<(u64, String, Vec<u8>)>> {
        if self.next_offset >= self.table.index.len() {
            return Ok(None);
        }

        let (kind, key_bytes, data_offset, entry_len) =
            decode_index_entry(&self.table.index, self.next_offset)?;
        let key = String::from_utf8(key_bytes.to_vec())
            .map_err(|_| Error::Format("index entry key is not utf-8".into()))?;
        let value = self.table.fetch(data_offset as usize)?;

        self.next_offset += entry_len;
        Ok(Some((kind, key, value)))
    }
}
