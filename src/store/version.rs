//! Version and manifest management for one index.
//!
//! A [`Version`] is an immutable snapshot of what an index reads from: the
//! live memtable plus its table files, newest first. Readers clone the current
//! `Arc<Version>` and never block writers.
//!
//! The set of live table files is recorded in a JSON `MANIFEST` that is
//! replaced atomically. Table files on disk that the manifest does not list
//! are leftovers of an interrupted flush or merge and are removed on open.

use super::memtable::MemTable;
use super::sstable::SSTableReader;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// File name of the index manifest.
pub const INDEX_MANIFEST_FILE: &str = "MANIFEST";

/// Metadata of one live table file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFileMeta {
    /// File number (names the file)
    pub file_number: u64,
    /// Size of the file in bytes
    pub file_size: u64,
    /// Net change in live keys the file contributes
    pub live_delta: i64,
}

/// Persisted state of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Comparator the index was created with
    pub comparator: String,
    /// Next unused file number
    pub next_file_number: u64,
    /// Live table files, newest first
    pub tables: Vec<TableFileMeta>,
}

impl IndexManifest {
    /// An empty manifest for a new index.
    pub fn new(comparator: &str) -> Self {
        Self { comparator: comparator.to_string(), next_file_number: 1, tables: Vec::new() }
    }

    /// Loads the manifest from `dir`; `Ok(None)` if the index is new.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Option<Self>> {
        let path = dir.as_ref().join(INDEX_MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&path)?;
        let manifest = serde_json::from_slice(&data)
            .map_err(|e| Error::corruption(format!("unreadable index manifest {:?}: {}", path, e)))?;
        Ok(Some(manifest))
    }

    /// Writes the manifest into `dir`, replacing any previous one.
    pub fn store<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        let tmp_path = dir.join(format!("{}.tmp", INDEX_MANIFEST_FILE));
        let json = serde_json::to_vec_pretty(self)?;

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, dir.join(INDEX_MANIFEST_FILE))?;
        Ok(())
    }
}

/// One live table file of an index.
pub(crate) struct TableHandle {
    pub(crate) meta: TableFileMeta,
    pub(crate) reader: Arc<SSTableReader>,
}

/// What readers see: the memtable and the table files, newest first.
pub(crate) struct Version {
    pub(crate) memtable: Arc<MemTable>,
    pub(crate) tables: Vec<Arc<TableHandle>>,
}

impl Version {
    /// Estimated number of live keys.
    pub(crate) fn approximate_num_keys(&self) -> u64 {
        let total = self.memtable.live_delta()
            + self.tables.iter().map(|table| table.meta.live_delta).sum::<i64>();
        total.max(0) as u64
    }

    /// Total bytes of table files.
    pub(crate) fn table_bytes(&self) -> u64 {
        self.tables.iter().map(|table| table.meta.file_size).sum()
    }

    /// Metadata of every table file, newest first.
    pub(crate) fn table_metas(&self) -> Vec<TableFileMeta> {
        self.tables.iter().map(|table| table.meta.clone()).collect()
    }
}
