//! # OrderedIndex - one comparator-ordered index
//!
//! An index is a small LSM tree: writes land in a memtable, a full memtable
//! is flushed to an immutable table file, and table files are merged once
//! enough of them pile up. Every write is also appended to the index log,
//! which is replayed on open and reset after each flush.
//!
//! ## Write path
//!
//! 1. Take the write lock
//! 2. Append the entry to the log (and fsync when `sync_wal` is set)
//! 3. Apply it to the memtable
//! 4. Flush the memtable if it is full, then merge table files if there
//!    are `compaction_trigger` of them
//!
//! Writers are serialized by the write lock, so the log order and the
//! memtable order of writes to the same key always agree. Readers clone the
//! current [`Version`] and never take the lock.
//!
//! ## Files
//!
//! ```text
//! <index dir>/
//!   MANIFEST      live table files (JSON, replaced atomically)
//!   index.log     writes not yet in a table file
//!   000001.sst    table files
//! ```

use super::cursor::{IndexCursor, MergingIterator};
use super::memtable::{MemTable, Slot};
use super::sstable::{parse_table_file_name, table_file_name, SSTableBuilder, SSTableReader};
use super::version::{IndexManifest, TableFileMeta, TableHandle, Version, INDEX_MANIFEST_FILE};
use super::wal::{LogEntry, LogReader, LogWriter, LOG_FILE};
use super::write_batch::{WriteBatch, WriteOp};
use crate::comparator::KeyComparator;
use crate::config::Options;
use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// State guarded by the write lock.
struct WriteState {
    /// `None` when the store runs without a log
    log: Option<LogWriter>,
    next_file_number: u64,
}

/// A single ordered index backed by a memtable, table files and a log.
pub struct OrderedIndex {
    name: String,
    dir: PathBuf,
    comparator: &'static dyn KeyComparator,
    current: RwLock<Arc<Version>>,
    state: Mutex<WriteState>,
    use_wal: bool,
    sync: bool,
    memtable_size: usize,
    block_size: usize,
    compaction_trigger: usize,
}

impl OrderedIndex {
    /// Opens the index stored in `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corruption`] if the index was created with a comparator
    /// other than `comparator`, if a live table file is missing, or if the log
    /// is damaged anywhere but its last record.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        name: &str,
        comparator: &'static dyn KeyComparator,
        options: &Options,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            if options.create_if_missing {
                std::fs::create_dir_all(&dir)?;
            } else {
                return Err(Error::not_found(format!("index directory does not exist: {:?}", dir)));
            }
        }

        let manifest = match IndexManifest::load(&dir)? {
            Some(manifest) => {
                if manifest.comparator != comparator.name() {
                    return Err(Error::corruption(format!(
                        "index {} was created with comparator {}, opened with {}",
                        name,
                        manifest.comparator,
                        comparator.name()
                    )));
                }
                manifest
            }
            None => {
                let manifest = IndexManifest::new(comparator.name());
                manifest.store(&dir)?;
                manifest
            }
        };
        remove_obsolete_files(&dir, &manifest)?;

        let mut tables = Vec::with_capacity(manifest.tables.len());
        for meta in &manifest.tables {
            let path = dir.join(table_file_name(meta.file_number));
            if !path.exists() {
                return Err(Error::corruption(format!("index {}: missing table file {:?}", name, path)));
            }
            let reader = SSTableReader::open(&path, comparator)?;
            tables.push(Arc::new(TableHandle { meta: meta.clone(), reader: Arc::new(reader) }));
        }

        let version = Version { memtable: Arc::new(MemTable::new(comparator)), tables };
        let index = Self {
            name: name.to_string(),
            dir,
            comparator,
            current: RwLock::new(Arc::new(version)),
            state: Mutex::new(WriteState { log: None, next_file_number: manifest.next_file_number }),
            use_wal: options.use_wal,
            sync: options.sync_wal,
            memtable_size: options.memtable_size,
            block_size: options.block_size,
            compaction_trigger: options.compaction_trigger,
        };

        if options.use_wal {
            let writer = index.recover()?;
            index.state.lock().log = Some(writer);
        }

        log::info!(
            "Opened index {} with {} table files, ~{} keys ({})",
            index.name,
            index.num_tables(),
            index.approximate_num_keys(),
            comparator.name()
        );

        Ok(index)
    }

    /// Replays the log into the memtable and returns a writer positioned at
    /// the end of its valid prefix.
    fn recover(&self) -> Result<LogWriter> {
        let path = self.log_path();
        let file_len = if path.exists() { std::fs::metadata(&path)?.len() } else { 0 };
        if file_len == 0 {
            return LogWriter::create(&path, &self.log_header());
        }

        let replay = LogReader::open(&path)?.replay()?;
        let mut entries = replay.entries.into_iter();
        match entries.next() {
            Some(LogEntry::Header { comparator }) => {
                if comparator != self.comparator.name() {
                    return Err(Error::corruption(format!(
                        "index {} was created with comparator {}, opened with {}",
                        self.name,
                        comparator,
                        self.comparator.name()
                    )));
                }
            }
            Some(_) => {
                return Err(Error::corruption(format!(
                    "index {}: log does not start with a header",
                    self.name
                )));
            }
            None => {
                // the header is written before the log is renamed into place
                return Err(Error::corruption(format!("index {}: log header is damaged", self.name)));
            }
        }

        let memtable = Arc::clone(&self.current.read().memtable);
        for entry in entries {
            self.apply_entry(&memtable, entry)?;
        }

        if replay.truncated {
            log::warn!(
                "Index {}: dropping torn log tail after {} of {} bytes",
                self.name,
                replay.valid_len,
                file_len
            );
            OpenOptions::new().write(true).open(&path)?.set_len(replay.valid_len)?;
        }

        LogWriter::open(&path)
    }

    fn apply_entry(&self, memtable: &MemTable, entry: LogEntry) -> Result<()> {
        match entry {
            LogEntry::Put { key, value } => memtable.put(Bytes::from(key), Bytes::from(value)),
            LogEntry::Delete { key } => memtable.delete(Bytes::from(key)),
            LogEntry::Batch(ops) => {
                for op in ops {
                    apply_op(memtable, op);
                }
            }
            LogEntry::Header { .. } => {
                return Err(Error::corruption(format!(
                    "index {}: header found in the middle of the log",
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn log_header(&self) -> LogEntry {
        LogEntry::Header { comparator: self.comparator.name().to_string() }
    }

    /// Appends `entry` to the log; a no-op for an index without one.
    fn append_to_log(&self, state: &mut WriteState, entry: &LogEntry) -> Result<()> {
        match state.log.as_mut() {
            Some(writer) => {
                writer.append(entry)?;
                if self.sync {
                    writer.sync()?;
                }
                Ok(())
            }
            None if self.use_wal => {
                Err(Error::invalid_state(format!("index {} has no open log", self.name)))
            }
            None => Ok(()),
        }
    }

    fn memtable(&self) -> Arc<MemTable> {
        Arc::clone(&self.current.read().memtable)
    }

    /// Inserts or overwrites `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let entry = LogEntry::Put { key: key.to_vec(), value: value.to_vec() };
        self.append_to_log(&mut state, &entry)?;
        self.memtable().put(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        self.maybe_flush(&mut state);
        Ok(())
    }

    /// Looks up the value stored under exactly `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if a table file cannot be read.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let version = self.version();
        if let Some(slot) = version.memtable.slot(key) {
            return Ok(slot_value(slot));
        }
        for table in &version.tables {
            if let Some(slot) = table.reader.get(key)? {
                return Ok(slot_value(slot));
            }
        }
        Ok(None)
    }

    /// Removes `key`; returns whether it was present.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let mut state = self.state.lock();
        if self.get(key)?.is_none() {
            return Ok(false);
        }
        self.append_to_log(&mut state, &LogEntry::Delete { key: key.to_vec() })?;
        self.memtable().delete(Bytes::copy_from_slice(key));
        self.maybe_flush(&mut state);
        Ok(true)
    }

    /// Applies every operation of `batch` as one log record.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();
        let ops = batch.into_ops();
        self.append_to_log(&mut state, &LogEntry::Batch(ops.clone()))?;
        let memtable = self.memtable();
        for op in ops {
            apply_op(&memtable, op);
        }
        self.maybe_flush(&mut state);
        Ok(())
    }

    /// Creates a forward cursor over a snapshot of the index.
    pub fn cursor(&self) -> IndexCursor {
        IndexCursor::new(self.version(), self.comparator)
    }

    fn version(&self) -> Arc<Version> {
        Arc::clone(&self.current.read())
    }

    /// Estimated number of live keys.
    pub fn approximate_num_keys(&self) -> u64 {
        self.version().approximate_num_keys()
    }

    /// Current size of the log file in bytes (0 without a log).
    pub fn log_size(&self) -> u64 {
        self.state.lock().log.as_ref().map_or(0, |writer| writer.file_size())
    }

    /// Number of live table files.
    pub fn num_tables(&self) -> usize {
        self.current.read().tables.len()
    }

    /// Total bytes of live table files.
    pub fn table_bytes(&self) -> u64 {
        self.current.read().table_bytes()
    }

    /// Whether a merge would leave fewer sources or drop tombstones.
    pub fn needs_compaction(&self) -> bool {
        let version = self.current.read();
        let sources = version.tables.len() + usize::from(!version.memtable.is_empty());
        sources > 1 || version.tables.iter().any(|table| table.reader.num_tombstones() > 0)
    }

    /// Flushes a full memtable, then merges table files past the trigger.
    ///
    /// The write that got here already succeeded, so failures are only logged.
    fn maybe_flush(&self, state: &mut WriteState) {
        if self.current.read().memtable.approximate_size() < self.memtable_size {
            return;
        }
        if let Err(e) = self.flush_locked(state) {
            log::warn!("Flush of index {} failed: {}", self.name, e);
            return;
        }
        if self.num_tables() >= self.compaction_trigger {
            if let Err(e) = self.merge_tables_locked(state) {
                log::warn!("Merge of index {} failed: {}", self.name, e);
            }
        }
    }

    /// Writes the memtable to a new table file and resets the log.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut WriteState) -> Result<()> {
        let version = self.version();
        if version.memtable.is_empty() {
            return Ok(());
        }

        let file_number = state.next_file_number;
        let drop_tombstones = version.tables.is_empty();
        let entries = version.memtable.iter().map(Ok);
        let handle = self.write_table(file_number, entries, drop_tombstones, version.memtable.live_delta())?;

        let mut tables: Vec<_> = handle.iter().cloned().collect();
        tables.extend(version.tables.iter().cloned());
        let flushed = Version { memtable: Arc::new(MemTable::new(self.comparator)), tables };
        if let Err(e) = self.install(state, file_number + 1, flushed, &[]) {
            if handle.is_some() {
                self.remove_table_file(file_number);
            }
            return Err(e);
        }

        log::info!(
            "Flushed index {}: {} entries to {}",
            self.name,
            version.memtable.len(),
            table_file_name(file_number)
        );

        // Everything in the log is now in a table file. A failed reset keeps
        // the old writer; replaying those entries again later is harmless.
        if state.log.is_some() {
            let writer = LogWriter::create(self.log_path(), &self.log_header())?;
            state.log = Some(writer);
        }
        Ok(())
    }

    /// Flushes the memtable and merges every table file into one.
    ///
    /// Tombstones are dropped and overwritten versions are discarded. Returns
    /// the number of table file bytes reclaimed. Writers block for the duration.
    pub fn compact(&self) -> Result<u64> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)?;
        let reclaimed = self.merge_tables_locked(&mut state)?;
        log::info!("Compacted index {}: reclaimed {} bytes", self.name, reclaimed);
        Ok(reclaimed)
    }

    fn merge_tables_locked(&self, state: &mut WriteState) -> Result<u64> {
        let version = self.version();
        let has_tombstones = version.tables.iter().any(|table| table.reader.num_tombstones() > 0);
        if version.tables.len() < 2 && !has_tombstones {
            return Ok(0);
        }
        let before = version.table_bytes();

        let iters = version.tables.iter().map(|table| table.reader.iter()).collect();
        let merge = MergingIterator::new(self.comparator, None, iters);
        let file_number = state.next_file_number;
        // every table takes part, so nothing older can hide behind a tombstone
        let handle = self.write_table(file_number, merge.into_entries(), true, 0)?;

        let tables: Vec<_> = handle.iter().cloned().collect();
        let after: u64 = tables.iter().map(|table| table.meta.file_size).sum();
        let merged = Version { memtable: Arc::clone(&version.memtable), tables };
        if let Err(e) = self.install(state, file_number + 1, merged, &version.table_metas()) {
            if handle.is_some() {
                self.remove_table_file(file_number);
            }
            return Err(e);
        }

        log::info!(
            "Merged {} table files of index {}: {} -> {} bytes",
            version.tables.len(),
            self.name,
            before,
            after
        );
        Ok(before.saturating_sub(after))
    }

    /// Builds table file `file_number` from sorted `entries`.
    ///
    /// Returns `None` (and leaves no file) if nothing was written. With
    /// `drop_tombstones` the file's key delta is its value count, otherwise
    /// it is `live_delta`.
    fn write_table(
        &self,
        file_number: u64,
        entries: impl Iterator<Item = Result<(Bytes, Slot)>>,
        drop_tombstones: bool,
        live_delta: i64,
    ) -> Result<Option<Arc<TableHandle>>> {
        let path = self.dir.join(table_file_name(file_number));
        let mut builder = SSTableBuilder::new(&path, self.comparator, self.block_size)?;

        for entry in entries {
            let added = entry.and_then(|(key, slot)| {
                if drop_tombstones && !slot.is_value() {
                    return Ok(());
                }
                builder.add(&key, &slot)
            });
            if let Err(e) = added {
                builder.abandon()?;
                return Err(e);
            }
        }

        if builder.num_entries() == 0 {
            builder.abandon()?;
            return Ok(None);
        }
        let live_delta = if drop_tombstones { builder.num_values() as i64 } else { live_delta };
        let file_size = builder.finish()?;
        let reader = SSTableReader::open(&path, self.comparator)?;

        Ok(Some(Arc::new(TableHandle {
            meta: TableFileMeta { file_number, file_size, live_delta },
            reader: Arc::new(reader),
        })))
    }

    /// Records `version` in the manifest and makes it current, then removes
    /// the files of `obsolete` tables.
    fn install(
        &self,
        state: &mut WriteState,
        next_file_number: u64,
        version: Version,
        obsolete: &[TableFileMeta],
    ) -> Result<()> {
        let manifest = IndexManifest {
            comparator: self.comparator.name().to_string(),
            next_file_number,
            tables: version.table_metas(),
        };
        manifest.store(&self.dir)?;

        state.next_file_number = next_file_number;
        *self.current.write() = Arc::new(version);

        // open cursors keep their own handles to these files
        for meta in obsolete {
            self.remove_table_file(meta.file_number);
        }
        Ok(())
    }

    fn remove_table_file(&self, file_number: u64) {
        let path = self.dir.join(table_file_name(file_number));
        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("Index {}: failed to remove {:?}: {}", self.name, path, e);
        }
    }

    /// Flushes and fsyncs the log.
    pub fn sync(&self) -> Result<()> {
        if let Some(writer) = self.state.lock().log.as_mut() {
            writer.sync()?;
        }
        Ok(())
    }

    /// Name of the index.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Comparator the index was opened with.
    pub fn comparator(&self) -> &'static dyn KeyComparator {
        self.comparator
    }

    /// Directory holding the index files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }
}

fn apply_op(memtable: &MemTable, op: WriteOp) {
    match op {
        WriteOp::Put { key, value } => memtable.put(Bytes::from(key), Bytes::from(value)),
        WriteOp::Delete { key } => memtable.delete(Bytes::from(key)),
    }
}

fn slot_value(slot: Slot) -> Option<Bytes> {
    match slot {
        Slot::Value(value) => Some(value),
        Slot::Tombstone => None,
    }
}

/// Removes table files the manifest does not list and stale temporaries.
fn remove_obsolete_files(dir: &Path, manifest: &IndexManifest) -> Result<()> {
    let live: HashSet<u64> = manifest.tables.iter().map(|meta| meta.file_number).collect();
    let manifest_tmp = format!("{}.tmp", INDEX_MANIFEST_FILE);
    let log_tmp = format!("{}.tmp", LOG_FILE);

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let obsolete = match parse_table_file_name(file_name) {
            Some(number) => !live.contains(&number),
            None => file_name == manifest_tmp || file_name == log_tmp,
        };
        if obsolete && entry.file_type()?.is_file() {
            log::info!("Removing obsolete file {:?}", entry.path());
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
