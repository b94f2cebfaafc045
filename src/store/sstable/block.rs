//! Block format implementation for table files.
//!
//! A block contains multiple key-value entries and uses restart points for
//! binary search and prefix compression. Searches take the index comparator.

use super::RESTART_INTERVAL;
use crate::comparator::KeyComparator;
use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::cmp::Ordering;

/// Size of an entry header (shared + unshared + value_len).
const ENTRY_HEADER_SIZE: usize = 12;

/// A parsed block (data block or index block).
#[derive(Debug, Clone)]
pub struct Block {
    data: Bytes,
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    /// Wraps raw block contents (without the checksum trailer).
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("Block too small"));
        }

        let num_restarts = (&data[data.len() - 4..]).get_u32_le();
        let restart_offset = (num_restarts as usize)
            .checked_mul(4)
            .and_then(|restarts| (data.len() - 4).checked_sub(restarts))
            .ok_or_else(|| Error::corruption("Invalid restart offset"))?;

        let block = Self { data, restart_offset, num_restarts };
        for index in 0..num_restarts {
            if block.restart_point(index) as usize > restart_offset {
                return Err(Error::corruption("Restart point out of range"));
            }
        }
        Ok(block)
    }

    /// Number of restart points.
    pub fn num_restarts(&self) -> u32 {
        self.num_restarts
    }

    fn restart_point(&self, index: u32) -> u32 {
        let offset = self.restart_offset + (index as usize * 4);
        (&self.data[offset..offset + 4]).get_u32_le()
    }

    /// Full key stored at restart point `index`, if the entry parses.
    fn restart_key(&self, index: u32) -> Option<&[u8]> {
        let offset = self.restart_point(index) as usize;
        let mut header = self.data.get(offset..offset + ENTRY_HEADER_SIZE)?;
        let shared = header.get_u32_le() as usize;
        let unshared = header.get_u32_le() as usize;
        if shared != 0 {
            return None;
        }
        let start = offset + ENTRY_HEADER_SIZE;
        self.data.get(start..start.checked_add(unshared)?)
    }

    /// Creates an unpositioned iterator over the block.
    pub fn iter(&self) -> BlockIterator {
        BlockIterator::new(self.clone())
    }
}

/// Builds one block from keys added in comparator order.
pub struct BlockBuilder {
    buffer: BytesMut,
    restarts: Vec<u32>,
    counter: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self { buffer: BytesMut::new(), restarts: vec![0], counter: 0, last_key: Vec::new() }
    }

    /// Appends an entry. Ordering is checked by the table builder.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let mut shared = 0;

        if self.counter >= RESTART_INTERVAL {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        } else if self.counter > 0 {
            shared = shared_prefix_len(&self.last_key, key);
        }

        let unshared = key.len() - shared;

        // shared | unshared | value_len | key_suffix | value
        self.buffer.put_u32_le(shared as u32);
        self.buffer.put_u32_le(unshared as u32);
        self.buffer.put_u32_le(value.len() as u32);
        self.buffer.put_slice(&key[shared..]);
        self.buffer.put_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Appends the restart array and returns the block contents.
    pub fn finish(mut self) -> Bytes {
        for restart in &self.restarts {
            self.buffer.put_u32_le(*restart);
        }
        self.buffer.put_u32_le(self.restarts.len() as u32);
        self.buffer.freeze()
    }

    /// Size of the block if it were finished now.
    pub fn current_size(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// Returns true if no entry was added.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Forward iterator over the entries of one block.
pub struct BlockIterator {
    block: Block,
    /// Offset of the entry after the current one
    next_offset: usize,
    key: Vec<u8>,
    value: Bytes,
    valid: bool,
    corrupt: bool,
}

impl BlockIterator {
    fn new(block: Block) -> Self {
        Self {
            block,
            next_offset: 0,
            key: Vec::new(),
            value: Bytes::new(),
            valid: false,
            corrupt: false,
        }
    }

    /// Positions at the first entry.
    pub fn seek_to_first(&mut self) {
        self.seek_to_restart_point(0);
        self.parse_next_entry();
    }

    /// Positions at the first entry whose key is not less than `target`.
    pub fn seek(&mut self, target: &[u8], comparator: &dyn KeyComparator) {
        // last restart point whose key sorts before the target
        let mut left = 0;
        let mut right = self.block.num_restarts;
        while left < right {
            let mid = left + (right - left) / 2;
            match self.block.restart_key(mid) {
                Some(key) if comparator.compare(key, target) == Ordering::Less => left = mid + 1,
                Some(_) => right = mid,
                None => {
                    self.mark_corrupt();
                    return;
                }
            }
        }

        self.seek_to_restart_point(left.saturating_sub(1));
        self.parse_next_entry();
        while self.valid && comparator.compare(&self.key, target) == Ordering::Less {
            self.parse_next_entry();
        }
    }

    /// Advances to the next entry.
    pub fn next(&mut self) {
        if self.valid {
            self.parse_next_entry();
        }
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.valid = false;
        self.next_offset = if index < self.block.num_restarts {
            self.block.restart_point(index) as usize
        } else {
            self.block.restart_offset
        };
    }

    fn parse_next_entry(&mut self) {
        if self.next_offset >= self.block.restart_offset {
            self.valid = false;
            return;
        }

        let data = &self.block.data[self.next_offset..self.block.restart_offset];
        if data.len() < ENTRY_HEADER_SIZE {
            self.mark_corrupt();
            return;
        }

        let mut header = &data[..ENTRY_HEADER_SIZE];
        let shared = header.get_u32_le() as usize;
        let unshared = header.get_u32_le() as usize;
        let value_len = header.get_u32_le() as usize;

        let key_end = ENTRY_HEADER_SIZE + unshared;
        let value_end = key_end + value_len;
        if shared > self.key.len() || data.len() < value_end {
            self.mark_corrupt();
            return;
        }

        self.key.truncate(shared);
        self.key.extend_from_slice(&data[ENTRY_HEADER_SIZE..key_end]);

        let value_start = self.next_offset + key_end;
        self.value = self.block.data.slice(value_start..value_start + value_len);

        self.next_offset += value_end;
        self.valid = true;
    }

    fn mark_corrupt(&mut self) {
        self.valid = false;
        self.corrupt = true;
    }

    /// Returns true if the iterator is positioned at an entry.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Returns true if iteration stopped on a malformed entry.
    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    /// Key of the current entry.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    pub fn key(&self) -> &[u8] {
        assert!(self.valid, "Iterator not valid");
        &self.key
    }

    /// Value of the current entry.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    pub fn value(&self) -> &Bytes {
        assert!(self.valid, "Iterator not valid");
        &self.value
    }
}
