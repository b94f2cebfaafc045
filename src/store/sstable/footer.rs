//! Table file footer.
//!
//! The footer is a fixed-size (48 bytes) structure at the end of a table file
//! that points to the index block and carries entry counts.

use super::{FOOTER_SIZE, MAGIC_NUMBER};
use crate::error::{Error, Result};
use bytes::{Buf, BufMut};

/// Location of a block inside a table file.
///
/// `size` covers the block contents and its checksum trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    /// Offset of the block from the start of the file
    pub offset: u64,
    /// Size of the block including its trailer
    pub size: u64,
}

impl BlockHandle {
    /// Encoded size of a handle.
    pub const ENCODED_SIZE: usize = 16;

    /// Creates a handle.
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Encodes the handle as two little-endian u64s.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_SIZE);
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.size);
        buf
    }

    /// Decodes a handle from the front of `data`.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < Self::ENCODED_SIZE {
            return Err(Error::corruption("BlockHandle too short"));
        }
        let offset = data.get_u64_le();
        let size = data.get_u64_le();
        Ok(Self { offset, size })
    }

    /// Offset just past the block.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.size
    }
}

/// Fixed-size trailer of a table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    /// Handle of the index block
    pub index_handle: BlockHandle,
    /// Number of value entries in the file
    pub num_values: u64,
    /// Number of tombstones in the file
    pub num_tombstones: u64,
}

impl Footer {
    /// Encodes the footer.
    ///
    /// ```text
    /// [index handle: 16][values: u64][tombstones: u64][padding: 8][magic: u64]
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        buf.put_slice(&self.index_handle.encode());
        buf.put_u64_le(self.num_values);
        buf.put_u64_le(self.num_tombstones);
        buf.put_bytes(0, 8);
        buf.put_u64_le(MAGIC_NUMBER);
        buf
    }

    /// Decodes and checks a footer.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != FOOTER_SIZE {
            return Err(Error::corruption(format!(
                "Footer size mismatch: expected {}, got {}",
                FOOTER_SIZE,
                data.len()
            )));
        }

        let magic = (&data[40..48]).get_u64_le();
        if magic != MAGIC_NUMBER {
            return Err(Error::corruption(format!(
                "Invalid table magic number: expected {:#x}, got {:#x}",
                MAGIC_NUMBER, magic
            )));
        }

        let index_handle = BlockHandle::decode(&data[0..16])?;
        let mut counts = &data[16..32];
        let num_values = counts.get_u64_le();
        let num_tombstones = counts.get_u64_le();

        Ok(Self { index_handle, num_values, num_tombstones })
    }
}
