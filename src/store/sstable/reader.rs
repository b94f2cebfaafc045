//! Table file reader.
//!
//! Keeps the index block in memory and reads data blocks on demand.

use super::block::{Block, BlockIterator};
use super::footer::{BlockHandle, Footer};
use super::{BLOCK_TRAILER_SIZE, FOOTER_SIZE};
use crate::comparator::KeyComparator;
use crate::error::{Error, Result};
use crate::store::memtable::Slot;
use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An open, immutable table file.
pub struct SSTableReader {
    path: PathBuf,
    /// Seek and read happen under one lock
    file: Mutex<File>,
    comparator: &'static dyn KeyComparator,
    index_block: Block,
    footer: Footer,
    file_size: u64,
}

impl SSTableReader {
    /// Opens a table file and loads its index block.
    pub fn open<P: AsRef<Path>>(path: P, comparator: &'static dyn KeyComparator) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;

        let file_size = file.metadata()?.len();
        if file_size < FOOTER_SIZE as u64 {
            return Err(Error::corruption(format!("{:?} is too small to be a table file", path)));
        }

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut buf = [0u8; FOOTER_SIZE];
        file.read_exact(&mut buf)?;
        let footer = Footer::decode(&buf)?;

        if footer.index_handle.end_offset() > file_size - FOOTER_SIZE as u64 {
            return Err(Error::corruption(format!("{:?}: index block out of range", path)));
        }
        let index_block = read_block(&mut file, &footer.index_handle)?;

        Ok(Self { path, file: Mutex::new(file), comparator, index_block, footer, file_size })
    }

    fn read_block(&self, handle: &BlockHandle) -> Result<Block> {
        let mut file = self.file.lock();
        read_block(&mut file, handle)
    }

    /// Looks up the slot stored under exactly `key`.
    pub(crate) fn get(&self, key: &[u8]) -> Result<Option<Slot>> {
        let mut index_iter = self.index_block.iter();
        index_iter.seek(key, self.comparator);
        if !index_iter.valid() {
            return if index_iter.is_corrupt() {
                Err(Error::corruption(format!("{:?}: damaged index block", self.path)))
            } else {
                Ok(None)
            };
        }

        let handle = BlockHandle::decode(index_iter.value())?;
        let mut iter = self.read_block(&handle)?.iter();
        iter.seek(key, self.comparator);
        if iter.is_corrupt() {
            return Err(Error::corruption(format!("{:?}: damaged data block", self.path)));
        }
        if iter.valid() && self.comparator.compare(iter.key(), key) == Ordering::Equal {
            return decode_slot(iter.value()).map(Some);
        }
        Ok(None)
    }

    /// Creates an unpositioned iterator over the whole file.
    pub fn iter(self: &Arc<Self>) -> SSTableIterator {
        SSTableIterator { table: Arc::clone(self), index_iter: self.index_block.iter(), data_iter: None }
    }

    /// Number of value entries.
    pub fn num_values(&self) -> u64 {
        self.footer.num_values
    }

    /// Number of tombstones.
    pub fn num_tombstones(&self) -> u64 {
        self.footer.num_tombstones
    }

    /// Size of the file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("path", &self.path)
            .field("file_size", &self.file_size)
            .field("footer", &self.footer)
            .finish()
    }
}

fn read_block(file: &mut File, handle: &BlockHandle) -> Result<Block> {
    let total_size = handle.size as usize;
    if total_size < BLOCK_TRAILER_SIZE {
        return Err(Error::corruption("Block size too small"));
    }

    file.seek(SeekFrom::Start(handle.offset))?;
    let mut buffer = vec![0u8; total_size];
    file.read_exact(&mut buffer)?;

    // [data...][checksum: 4 bytes]
    let data_size = total_size - BLOCK_TRAILER_SIZE;
    let stored = (&buffer[data_size..]).get_u32_le();
    let computed = crc32fast::hash(&buffer[..data_size]);
    if computed != stored {
        return Err(Error::ChecksumMismatch { expected: stored, actual: computed });
    }

    buffer.truncate(data_size);
    Block::new(Bytes::from(buffer))
}

fn decode_slot(data: &[u8]) -> Result<Slot> {
    Slot::decode(data).ok_or_else(|| Error::corruption("unknown entry tag in table file"))
}

/// Forward iterator over one table file.
///
/// Owns a reference to its reader, so it stays usable after the file has
/// been replaced by a merge.
pub struct SSTableIterator {
    table: Arc<SSTableReader>,
    index_iter: BlockIterator,
    data_iter: Option<BlockIterator>,
}

impl SSTableIterator {
    /// Positions at the first entry.
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.index_iter.seek_to_first();
        self.load_block(None)
    }

    /// Positions at the first entry not less than `target`.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.index_iter.seek(target, self.table.comparator);
        self.load_block(Some(target))
    }

    /// Advances to the next entry.
    pub fn next(&mut self) -> Result<()> {
        if let Some(iter) = self.data_iter.as_mut() {
            iter.next();
        }
        self.skip_exhausted_blocks()
    }

    fn load_block(&mut self, target: Option<&[u8]>) -> Result<()> {
        self.data_iter = None;
        if !self.index_iter.valid() {
            return self.check_index();
        }

        let handle = BlockHandle::decode(self.index_iter.value())?;
        let mut iter = self.table.read_block(&handle)?.iter();
        match target {
            Some(target) => iter.seek(target, self.table.comparator),
            None => iter.seek_to_first(),
        }
        self.data_iter = Some(iter);
        self.skip_exhausted_blocks()
    }

    fn skip_exhausted_blocks(&mut self) -> Result<()> {
        while let Some(iter) = self.data_iter.as_ref() {
            if iter.valid() {
                return Ok(());
            }
            if iter.is_corrupt() {
                self.data_iter = None;
                return Err(Error::corruption(format!("{:?}: damaged data block", self.table.path)));
            }

            self.index_iter.next();
            if !self.index_iter.valid() {
                self.data_iter = None;
                return self.check_index();
            }
            let handle = BlockHandle::decode(self.index_iter.value())?;
            let mut next = self.table.read_block(&handle)?.iter();
            next.seek_to_first();
            self.data_iter = Some(next);
        }
        Ok(())
    }

    fn check_index(&self) -> Result<()> {
        if self.index_iter.is_corrupt() {
            return Err(Error::corruption(format!("{:?}: damaged index block", self.table.path)));
        }
        Ok(())
    }

    /// Returns true if the iterator is positioned at an entry.
    pub fn valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|iter| iter.valid())
    }

    /// Key of the current entry.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    pub fn key(&self) -> &[u8] {
        self.current().key()
    }

    /// Decoded slot of the current entry.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    pub(crate) fn slot(&self) -> Result<Slot> {
        decode_slot(self.current().value())
    }

    fn current(&self) -> &BlockIterator {
        match self.data_iter.as_ref() {
            Some(iter) if iter.valid() => iter,
            _ => panic!("Iterator not valid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::comparator::VERSION_COMPARATOR;
    use crate::store::sstable::SSTableBuilder;
    use tempfile::TempDir;

    /// Builds a file holding `pk|ts` for ts in `range`, newest first.
    fn build(dir: &TempDir, range: std::ops::Range<u64>, block_size: usize) -> Arc<SSTableReader> {
        let path = dir.path().join("000001.sst");
        let mut builder = SSTableBuilder::new(&path, &VERSION_COMPARATOR, block_size).unwrap();
        for ts in range.rev() {
            let slot = if ts % 10 == 0 {
                Slot::Tombstone
            } else {
                Slot::Value(Bytes::from(format!("v{}", ts)))
            };
            builder.add(&encode(b"pk", ts), &slot).unwrap();
        }
        builder.finish().unwrap();
        Arc::new(SSTableReader::open(&path, &VERSION_COMPARATOR).unwrap())
    }

    #[test]
    fn test_get_across_blocks() {
        let dir = TempDir::new().unwrap();
        let table = build(&dir, 0..500, 256);

        assert_eq!(table.get(&encode(b"pk", 123)).unwrap(), Some(Slot::Value(Bytes::from_static(b"v123"))));
        assert_eq!(table.get(&encode(b"pk", 120)).unwrap(), Some(Slot::Tombstone));
        assert_eq!(table.get(&encode(b"pk", 900)).unwrap(), None);
        assert_eq!(table.get(&encode(b"zz", 1)).unwrap(), None);
        assert_eq!(table.num_values(), 450);
        assert_eq!(table.num_tombstones(), 50);
    }

    #[test]
    fn test_iterator_walks_every_entry() {
        let dir = TempDir::new().unwrap();
        let table = build(&dir, 0..300, 128);

        let mut iter = table.iter();
        iter.seek_to_first().unwrap();
        let mut expected = 300u64;
        while iter.valid() {
            expected -= 1;
            assert_eq!(iter.key(), encode(b"pk", expected).as_slice());
            iter.next().unwrap();
        }
        assert_eq!(expected, 0);
    }

    #[test]
    fn test_iterator_seek() {
        let dir = TempDir::new().unwrap();
        let table = build(&dir, 0..300, 128);

        let mut iter = table.iter();
        iter.seek(&encode(b"pk", 150)).unwrap();
        assert_eq!(iter.key(), encode(b"pk", 150).as_slice());
        assert_eq!(iter.slot().unwrap(), Slot::Tombstone);

        iter.seek(&encode(b"pk", u64::MAX)).unwrap();
        assert_eq!(iter.key(), encode(b"pk", 299).as_slice());

        iter.seek(&encode(b"pl", 0)).unwrap();
        assert!(!iter.valid());
    }

    #[test]
    fn test_damaged_block_is_reported() {
        let dir = TempDir::new().unwrap();
        let table = build(&dir, 0..100, 4096);
        let path = table.path().to_path_buf();
        drop(table);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[20] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let table = SSTableReader::open(&path, &VERSION_COMPARATOR).unwrap();
        assert!(matches!(table.get(&encode(b"pk", 50)), Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_open_rejects_short_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.sst");
        std::fs::write(&path, b"short").unwrap();
        assert!(matches!(SSTableReader::open(&path, &VERSION_COMPARATOR), Err(Error::Corruption(_))));
    }
}
