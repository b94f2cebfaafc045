//! Atomic multi-operation writes against a single index.
//!
//! A batch is appended to the index log as one record and applied to the
//! in-memory index while the log lock is held, so a crash either replays the
//! whole batch or none of it. Batches never span indexes.
//!
//! ```rust
//! use disktable::store::WriteBatch;
//!
//! let mut batch = WriteBatch::new();
//! batch.put(b"k1", b"v1");
//! batch.delete(b"k0");
//! assert_eq!(batch.len(), 2);
//! ```

use serde::{Deserialize, Serialize};

/// A single operation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Insert or overwrite `key`.
    Put {
        /// Raw index key
        key: Vec<u8>,
        /// Stored value
        value: Vec<u8>,
    },
    /// Remove `key` if present.
    Delete {
        /// Raw index key
        key: Vec<u8>,
    },
}

impl WriteOp {
    /// Returns the raw key this operation targets.
    pub fn key(&self) -> &[u8] {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

/// Ordered list of puts and deletes applied to one index as a unit.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    operations: Vec<WriteOp>,
    approximate_size: usize,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a put.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.approximate_size += key.len() + value.len() + 8;
        self.operations.push(WriteOp::Put { key: key.to_vec(), value: value.to_vec() });
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: &[u8]) {
        self.approximate_size += key.len() + 4;
        self.operations.push(WriteOp::Delete { key: key.to_vec() });
    }

    /// Drops every queued operation.
    pub fn clear(&mut self) {
        self.operations.clear();
        self.approximate_size = 0;
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Rough byte size of the queued keys and values.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size
    }

    /// Queued operations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.operations.iter()
    }

    pub(crate) fn into_ops(self) -> Vec<WriteOp> {
        self.operations
    }
}
