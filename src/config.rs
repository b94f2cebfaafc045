//! Configuration options for disktable.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default memtable size before it is flushed to a table file (4MB).
pub const DEFAULT_MEMTABLE_SIZE: usize = 4 * 1024 * 1024;

/// Default target size of a table file data block (4KB).
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default number of table files that triggers a merge.
pub const DEFAULT_COMPACTION_TRIGGER: usize = 4;

/// Milliseconds per TTL unit by default (TTL values are given in minutes).
pub const DEFAULT_TTL_UNIT_MS: u64 = 60 * 1000;

/// Configuration options for opening a store.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the store directory if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Error if the store directory already exists.
    /// Default: false
    pub error_if_exists: bool,

    /// Append every write to the index log.
    /// Without it, writes still in the memtable are lost on close.
    /// Default: true
    pub use_wal: bool,

    /// Sync the index log after every write.
    /// Default: false
    pub sync_wal: bool,

    /// Size of the memtable before it is flushed to a table file.
    /// Default: 4MB
    pub memtable_size: usize,

    /// Target size of a data block inside a table file.
    /// Default: 4KB
    pub block_size: usize,

    /// Number of table files in one index that triggers merging them.
    /// Default: 4
    pub compaction_trigger: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            use_wal: true,
            sync_wal: false,
            memtable_size: DEFAULT_MEMTABLE_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            compaction_trigger: DEFAULT_COMPACTION_TRIGGER,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Enables or disables the index log.
    pub fn use_wal(mut self, value: bool) -> Self {
        self.use_wal = value;
        self
    }

    /// Enables or disables syncing after every write.
    pub fn sync_wal(mut self, value: bool) -> Self {
        self.sync_wal = value;
        self
    }

    /// Sets the memtable size in bytes.
    pub fn memtable_size(mut self, size: usize) -> Self {
        self.memtable_size = size;
        self
    }

    /// Sets the data block size in bytes.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets how many table files trigger a merge.
    pub fn compaction_trigger(mut self, files: usize) -> Self {
        self.compaction_trigger = files;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.sync_wal && !self.use_wal {
            return Err(crate::Error::invalid_argument("sync_wal requires use_wal"));
        }
        if self.memtable_size == 0 {
            return Err(crate::Error::invalid_argument("memtable_size must be > 0"));
        }
        if self.block_size == 0 {
            return Err(crate::Error::invalid_argument("block_size must be > 0"));
        }
        if self.compaction_trigger < 2 {
            return Err(crate::Error::invalid_argument("compaction_trigger must be >= 2"));
        }
        Ok(())
    }
}

/// Retention policy applied by traversal iterators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TtlType {
    /// A version expires once it is older than `ttl` time units.
    AbsoluteTime,
    /// Only the newest `ttl` versions of each key are live.
    LatestTime,
}

/// Options shared by every table opened under one root directory.
#[derive(Debug, Clone)]
pub struct TableOptions {
    /// Directory under which each table gets its own sub-directory.
    pub root: PathBuf,

    /// Options for the underlying store.
    pub store: Options,

    /// Milliseconds per TTL unit for [`TtlType::AbsoluteTime`].
    /// Default: one minute
    pub ttl_unit_ms: u64,
}

impl TableOptions {
    /// Creates table options rooted at `root` with default store options.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), store: Options::default(), ttl_unit_ms: DEFAULT_TTL_UNIT_MS }
    }

    /// Sets the store options.
    pub fn store(mut self, store: Options) -> Self {
        self.store = store;
        self
    }

    /// Sets the TTL unit in milliseconds.
    pub fn ttl_unit_ms(mut self, unit: u64) -> Self {
        self.ttl_unit_ms = unit;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.ttl_unit_ms == 0 {
            return Err(crate::Error::invalid_argument("ttl_unit_ms must be > 0"));
        }
        self.store.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert!(opts.create_if_missing);
        assert!(!opts.error_if_exists);
        assert!(opts.use_wal);
        assert_eq!(opts.memtable_size, DEFAULT_MEMTABLE_SIZE);
        assert_eq!(opts.compaction_trigger, DEFAULT_COMPACTION_TRIGGER);
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new().sync_wal(true).memtable_size(1024).block_size(256);
        assert!(opts.sync_wal);
        assert_eq!(opts.memtable_size, 1024);
        assert_eq!(opts.block_size, 256);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.memtable_size = 0;
        assert!(opts.validate().is_err());

        let opts = Options::new().compaction_trigger(1);
        assert!(opts.validate().is_err());

        let opts = Options::new().use_wal(false).sync_wal(true);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_table_options() {
        let opts = TableOptions::new("/tmp/tables").ttl_unit_ms(1);
        assert_eq!(opts.ttl_unit_ms, 1);
        assert!(opts.validate().is_ok());

        let opts = TableOptions::new("/tmp/tables").ttl_unit_ms(0);
        assert!(opts.validate().is_err());
    }
}
