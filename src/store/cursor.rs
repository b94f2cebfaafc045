//! Forward cursor over an [`OrderedIndex`](super::OrderedIndex).
//!
//! A cursor merges the memtable with every table file of the version it was
//! created from. For equal keys the newest source wins, and tombstones hide
//! the entries they shadow. The memtable side re-enters the SkipList with a
//! bound search on every step, so it never dangles when entries change
//! concurrently; table files are immutable.
//!
//! Resources (including table files replaced by a merge) are released as
//! soon as the cursor is dropped.

use super::memtable::{MemTable, Slot};
use super::sstable::SSTableIterator;
use super::version::Version;
use crate::comparator::KeyComparator;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::Arc;

/// Memtable side of a merge.
struct MemSource {
    memtable: Arc<MemTable>,
    current: Option<(Bytes, Slot)>,
}

/// One input of the merge.
enum Source {
    Mem(MemSource),
    Table(SSTableIterator),
}

impl Source {
    fn seek_to_first(&mut self) -> Result<()> {
        match self {
            Source::Mem(mem) => {
                mem.current = mem.memtable.lower_bound(Bound::Unbounded);
                Ok(())
            }
            Source::Table(iter) => iter.seek_to_first(),
        }
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        match self {
            Source::Mem(mem) => {
                mem.current = mem.memtable.lower_bound(Bound::Included(target));
                Ok(())
            }
            Source::Table(iter) => iter.seek(target),
        }
    }

    fn next(&mut self) -> Result<()> {
        match self {
            Source::Mem(mem) => {
                if let Some((key, _)) = mem.current.take() {
                    mem.current = mem.memtable.lower_bound(Bound::Excluded(&key[..]));
                }
                Ok(())
            }
            Source::Table(iter) => iter.next(),
        }
    }

    fn key(&self) -> Option<&[u8]> {
        match self {
            Source::Mem(mem) => mem.current.as_ref().map(|(key, _)| &key[..]),
            Source::Table(iter) if iter.valid() => Some(iter.key()),
            Source::Table(_) => None,
        }
    }

    fn slot(&self) -> Result<Slot> {
        match self {
            Source::Mem(mem) => mem
                .current
                .as_ref()
                .map(|(_, slot)| slot.clone())
                .ok_or_else(|| Error::internal("memtable source not positioned")),
            Source::Table(iter) => iter.slot(),
        }
    }
}

/// Merges sorted sources, newest first, yielding each key once.
///
/// Tombstones are yielded too; [`IndexCursor`] skips them and a merge
/// of table files drops them.
pub(crate) struct MergingIterator {
    comparator: &'static dyn KeyComparator,
    /// Newest source first
    sources: Vec<Source>,
    /// Source holding the current entry
    current: Option<usize>,
}

impl MergingIterator {
    /// Merges the memtable (if any) and `tables`, both given newest first.
    pub(crate) fn new(
        comparator: &'static dyn KeyComparator,
        memtable: Option<Arc<MemTable>>,
        tables: Vec<SSTableIterator>,
    ) -> Self {
        let mut sources = Vec::with_capacity(tables.len() + 1);
        if let Some(memtable) = memtable {
            sources.push(Source::Mem(MemSource { memtable, current: None }));
        }
        sources.extend(tables.into_iter().map(Source::Table));
        Self { comparator, sources, current: None }
    }

    pub(crate) fn seek_to_first(&mut self) -> Result<()> {
        for source in &mut self.sources {
            source.seek_to_first()?;
        }
        self.find_smallest();
        Ok(())
    }

    pub(crate) fn seek(&mut self, target: &[u8]) -> Result<()> {
        for source in &mut self.sources {
            source.seek(target)?;
        }
        self.find_smallest();
        Ok(())
    }

    /// Moves past the current key in every source that holds it.
    pub(crate) fn next(&mut self) -> Result<()> {
        let Some(pos) = self.current else {
            return Ok(());
        };
        let key = match self.sources[pos].key() {
            Some(key) => key.to_vec(),
            None => return Ok(()),
        };

        let comparator = self.comparator;
        for source in &mut self.sources {
            if source.key().is_some_and(|k| comparator.compare(k, &key) == Ordering::Equal) {
                source.next()?;
            }
        }
        self.find_smallest();
        Ok(())
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<(usize, &[u8])> = None;
        for (pos, source) in self.sources.iter().enumerate() {
            let Some(key) = source.key() else {
                continue;
            };
            // strict less keeps the newer source on ties
            match smallest {
                Some((_, best)) if self.comparator.compare(key, best) != Ordering::Less => {}
                _ => smallest = Some((pos, key)),
            }
        }
        self.current = smallest.map(|(pos, _)| pos);
    }

    pub(crate) fn key(&self) -> Option<&[u8]> {
        self.current.and_then(|pos| self.sources[pos].key())
    }

    pub(crate) fn slot(&self) -> Result<Slot> {
        match self.current {
            Some(pos) => self.sources[pos].slot(),
            None => Err(Error::internal("merging iterator not positioned")),
        }
    }

    /// Walks every merged entry from the start, stopping after the first error.
    pub(crate) fn into_entries(mut self) -> impl Iterator<Item = Result<(Bytes, Slot)>> {
        let mut started = false;
        let mut failed = false;
        std::iter::from_fn(move || {
            if failed {
                return None;
            }
            let step = if started {
                self.next()
            } else {
                started = true;
                self.seek_to_first()
            };
            let entry = step.and_then(|()| match self.key() {
                Some(key) => {
                    let key = Bytes::copy_from_slice(key);
                    self.slot().map(|slot| Some((key, slot)))
                }
                None => Ok(None),
            });
            match entry {
                Ok(Some(entry)) => Some(Ok(entry)),
                Ok(None) => None,
                Err(e) => {
                    failed = true;
                    Some(Err(e))
                }
            }
        })
    }
}

/// A forward cursor with seek.
pub struct IndexCursor {
    merge: MergingIterator,
    /// Keeps the table files of the snapshot open
    _version: Arc<Version>,
    current: Option<(Bytes, Bytes)>,
    error: Option<String>,
}

impl IndexCursor {
    pub(crate) fn new(version: Arc<Version>, comparator: &'static dyn KeyComparator) -> Self {
        let tables = version.tables.iter().map(|table| table.reader.iter()).collect();
        let merge = MergingIterator::new(comparator, Some(Arc::clone(&version.memtable)), tables);
        Self { merge, _version: version, current: None, error: None }
    }

    /// Positions at the first entry of the index.
    pub fn seek_to_first(&mut self) {
        let result = self.merge.seek_to_first();
        self.settle(result);
    }

    /// Positions at the first entry that is not less than `target`.
    pub fn seek(&mut self, target: &[u8]) {
        let result = self.merge.seek(target);
        self.settle(result);
    }

    /// Advances to the entry after the current one.
    pub fn next(&mut self) {
        if self.current.is_some() {
            let result = self.merge.next();
            self.settle(result);
        }
    }

    /// Lands on the first live entry at or after the merge position.
    fn settle(&mut self, mut step: Result<()>) {
        self.current = None;
        loop {
            if let Err(e) = step {
                log::warn!("Index cursor stopped: {}", e);
                self.error = Some(e.to_string());
                return;
            }
            let Some(key) = self.merge.key() else {
                return;
            };
            match self.merge.slot() {
                Ok(Slot::Value(value)) => {
                    self.current = Some((Bytes::copy_from_slice(key), value));
                    return;
                }
                Ok(Slot::Tombstone) => step = self.merge.next(),
                Err(e) => step = Err(e),
            }
        }
    }

    /// Returns true if the cursor is positioned at an entry.
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Key of the current entry.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is not valid.
    pub fn key(&self) -> &[u8] {
        &self.current.as_ref().expect("Cursor not valid").0
    }

    /// Value of the current entry.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is not valid.
    pub fn value(&self) -> &Bytes {
        &self.current.as_ref().expect("Cursor not valid").1
    }

    /// `Ok` unless a table file could not be read while moving.
    pub fn status(&self) -> Result<()> {
        match &self.error {
            Some(msg) => Err(Error::corruption(msg.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::encode;
    use crate::comparator::VERSION_COMPARATOR;
    use crate::config::Options;
    use crate::store::OrderedIndex;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> OrderedIndex {
        OrderedIndex::open(dir.path(), "idx0", &VERSION_COMPARATOR, &Options::default()).unwrap()
    }

    fn values(index: &OrderedIndex) -> Vec<Vec<u8>> {
        let mut cursor = index.cursor();
        cursor.seek_to_first();
        let mut seen = Vec::new();
        while cursor.valid() {
            seen.push(cursor.value().to_vec());
            cursor.next();
        }
        cursor.status().unwrap();
        seen
    }

    #[test]
    fn test_cursor_walks_in_comparator_order() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);
        index.put(&encode(b"b", 1), b"b1").unwrap();
        index.put(&encode(b"a", 1), b"a1").unwrap();
        index.put(&encode(b"a", 2), b"a2").unwrap();

        let mut cursor = index.cursor();
        assert!(!cursor.valid());

        assert_eq!(values(&index), vec![b"a2".to_vec(), b"a1".to_vec(), b"b1".to_vec()]);

        // next() past the end stays invalid
        cursor.seek(&encode(b"b", 1));
        cursor.next();
        assert!(!cursor.valid());
        cursor.next();
        assert!(!cursor.valid());
    }

    #[test]
    fn test_seek_lands_on_lower_bound() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);
        index.put(&encode(b"k", 30), b"30").unwrap();
        index.put(&encode(b"k", 10), b"10").unwrap();

        let mut cursor = index.cursor();
        cursor.seek(&encode(b"k", 20));
        assert!(cursor.valid());
        assert_eq!(cursor.key(), encode(b"k", 10).as_slice());

        cursor.seek(&encode(b"z", 0));
        assert!(!cursor.valid());
    }

    #[test]
    fn test_cursor_survives_concurrent_delete() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);
        for ts in 1..=3u64 {
            index.put(&encode(b"k", ts), b"v").unwrap();
        }

        let mut cursor = index.cursor();
        cursor.seek_to_first();
        index.delete(&encode(b"k", 3)).unwrap();
        index.delete(&encode(b"k", 2)).unwrap();

        cursor.next();
        assert_eq!(cursor.key(), encode(b"k", 1).as_slice());
    }

    #[test]
    fn test_merge_across_memtable_and_table_files() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        index.put(&encode(b"a", 1), b"a1-old").unwrap();
        index.put(&encode(b"c", 1), b"c1").unwrap();
        index.flush().unwrap();

        index.put(&encode(b"a", 1), b"a1-new").unwrap();
        index.put(&encode(b"b", 1), b"b1").unwrap();
        index.flush().unwrap();

        index.delete(&encode(b"c", 1)).unwrap();
        index.put(&encode(b"d", 1), b"d1").unwrap();
        assert_eq!(index.num_tables(), 2);

        assert_eq!(values(&index), vec![b"a1-new".to_vec(), b"b1".to_vec(), b"d1".to_vec()]);

        let mut cursor = index.cursor();
        cursor.seek(&encode(b"c", 1));
        assert_eq!(cursor.key(), encode(b"d", 1).as_slice());
    }

    #[test]
    fn test_cursor_keeps_its_snapshot_across_merge() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);
        for ts in 1..=3u64 {
            index.put(&encode(b"k", ts), b"v").unwrap();
            index.flush().unwrap();
        }

        let mut cursor = index.cursor();
        cursor.seek_to_first();
        index.compact().unwrap();

        let mut seen = 0;
        while cursor.valid() {
            seen += 1;
            cursor.next();
        }
        assert_eq!(seen, 3);
        cursor.status().unwrap();
    }
}
