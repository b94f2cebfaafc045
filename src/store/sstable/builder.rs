//! Table file builder.
//!
//! Builds a table file from entries added in comparator order.

use super::block::BlockBuilder;
use super::footer::{BlockHandle, Footer};
use super::BLOCK_TRAILER_SIZE;
use crate::comparator::KeyComparator;
use crate::error::{Error, Result};
use crate::store::memtable::Slot;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes one table file.
pub struct SSTableBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    comparator: &'static dyn KeyComparator,
    block_size: usize,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    last_key: Vec<u8>,
    offset: u64,
    num_values: u64,
    num_tombstones: u64,
}

impl SSTableBuilder {
    /// Creates the file at `path`, replacing any previous content.
    pub fn new<P: AsRef<Path>>(
        path: P,
        comparator: &'static dyn KeyComparator,
        block_size: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            comparator,
            block_size,
            data_block: BlockBuilder::new(),
            index_block: BlockBuilder::new(),
            last_key: Vec::new(),
            offset: 0,
            num_values: 0,
            num_tombstones: 0,
        })
    }

    /// Adds an entry. Keys must strictly increase under the comparator.
    pub(crate) fn add(&mut self, key: &[u8], slot: &Slot) -> Result<()> {
        if self.num_entries() > 0 && self.comparator.compare(key, &self.last_key) != Ordering::Greater {
            return Err(Error::invalid_argument("Keys must be added in sorted order"));
        }

        self.data_block.add(key, &slot.encode());
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        if slot.is_value() {
            self.num_values += 1;
        } else {
            self.num_tombstones += 1;
        }

        if self.data_block.current_size() >= self.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }

        let block = std::mem::take(&mut self.data_block);
        let handle = self.write_block(&block.finish())?;
        // the index maps the last key of every block to its handle
        self.index_block.add(&self.last_key, &handle.encode());
        Ok(())
    }

    fn write_block(&mut self, data: &[u8]) -> Result<BlockHandle> {
        self.writer.write_all(data)?;
        self.writer.write_all(&crc32fast::hash(data).to_le_bytes())?;

        let handle = BlockHandle::new(self.offset, (data.len() + BLOCK_TRAILER_SIZE) as u64);
        self.offset = handle.end_offset();
        Ok(handle)
    }

    /// Writes the index block and footer, then syncs the file.
    ///
    /// Returns the final file size.
    pub fn finish(mut self) -> Result<u64> {
        self.flush_data_block()?;

        let index_block = std::mem::take(&mut self.index_block);
        let index_handle = self.write_block(&index_block.finish())?;

        let footer = Footer { index_handle, num_values: self.num_values, num_tombstones: self.num_tombstones };
        let encoded = footer.encode();
        self.writer.write_all(&encoded)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        Ok(self.offset + encoded.len() as u64)
    }

    /// Discards the partially written file.
    pub fn abandon(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        match std::fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Entries added so far.
    pub fn num_entries(&self) -> u64 {
        self.num_values + self.num_tombstones
    }

    /// Value entries added so far.
    pub fn num_values(&self) -> u64 {
        self.num_values
    }

    /// Path of the file being built.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
