//! Embedded ordered key-value store.
//!
//! A [`Store`] is a directory holding any number of named [`OrderedIndex`]es,
//! each ordered by the comparator it was created with. The table layer only
//! relies on the capabilities exposed here:
//!
//! - create/open an index with a pluggable comparator
//! - point put/get/delete by raw key, plus atomic [`WriteBatch`]es
//! - forward iteration with seek ([`IndexCursor`])
//! - irreversible deletion of the whole store
//! - best-effort compaction and approximate key counts
//!
//! Each index keeps recent writes in a memtable and the rest in immutable
//! table files on disk, so its memory use is bounded by the memtable size.
//!
//! ```rust,no_run
//! use disktable::comparator::VERSION_COMPARATOR;
//! use disktable::store::{IndexDescriptor, Store};
//! use disktable::Options;
//!
//! # fn main() -> Result<(), disktable::Error> {
//! let store = Store::open(
//!     "./store",
//!     &Options::default(),
//!     vec![IndexDescriptor::new("idx0", &VERSION_COMPARATOR)],
//! )?;
//! let index = store.index("idx0").expect("declared above");
//! index.put(b"key|\0\0\0\0\0\0\0\x01", b"value")?;
//! # Ok(())
//! # }
//! ```

mod cursor;
mod index;
mod memtable;
pub mod sstable;
mod version;
pub mod wal;
mod write_batch;

pub use cursor::IndexCursor;
pub use index::OrderedIndex;
pub use write_batch::{WriteBatch, WriteOp};

use crate::comparator::KeyComparator;
use crate::config::Options;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name and comparator of an index to open.
#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    /// Index name; also its sub-directory inside the store
    pub name: String,
    /// Comparator fixed for the life of the index
    pub comparator: &'static dyn KeyComparator,
}

impl IndexDescriptor {
    /// Creates a descriptor.
    pub fn new(name: impl Into<String>, comparator: &'static dyn KeyComparator) -> Self {
        Self { name: name.into(), comparator }
    }
}

/// A directory of named ordered indexes.
pub struct Store {
    path: PathBuf,
    indexes: Vec<Arc<OrderedIndex>>,
    by_name: HashMap<String, usize>,
}

impl Store {
    /// Opens every described index under `path`, creating what is missing.
    ///
    /// # Errors
    ///
    /// Fails on the first index that cannot be opened; indexes opened before
    /// it are closed again and no store is returned.
    pub fn open<P: AsRef<Path>>(
        path: P,
        options: &Options,
        descriptors: Vec<IndexDescriptor>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        options.validate()?;

        if !path.exists() {
            if options.create_if_missing {
                std::fs::create_dir_all(&path)?;
            } else {
                return Err(Error::not_found(format!("store directory does not exist: {:?}", path)));
            }
        } else if options.error_if_exists {
            return Err(Error::AlreadyExists(format!("store already exists: {:?}", path)));
        }

        let mut indexes = Vec::with_capacity(descriptors.len());
        let mut by_name = HashMap::with_capacity(descriptors.len());

        for descriptor in descriptors {
            if by_name.contains_key(&descriptor.name) {
                return Err(Error::invalid_argument(format!(
                    "index {} declared twice",
                    descriptor.name
                )));
            }
            let index = OrderedIndex::open(
                path.join(&descriptor.name),
                &descriptor.name,
                descriptor.comparator,
                options,
            )?;
            by_name.insert(descriptor.name, indexes.len());
            indexes.push(Arc::new(index));
        }

        Ok(Self { path, indexes, by_name })
    }

    /// Looks up an index by name.
    pub fn index(&self, name: &str) -> Option<&Arc<OrderedIndex>> {
        self.by_name.get(name).map(|&pos| &self.indexes[pos])
    }

    /// All indexes in the order they were declared.
    pub fn indexes(&self) -> &[Arc<OrderedIndex>] {
        &self.indexes
    }

    /// Store directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Syncs every index log.
    pub fn sync(&self) -> Result<()> {
        for index in &self.indexes {
            index.sync()?;
        }
        Ok(())
    }

    /// Removes every file of the store at `path`. Missing stores are fine.
    pub fn destroy<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_dir_all(path)?;
            log::info!("Destroyed store {:?}", path);
        }
        Ok(())
    }
}
