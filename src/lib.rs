//! # disktable - A Disk-Backed Multi-Dimension Table
//!
//! disktable stores versioned records `(key, timestamp, value)` in ordered,
//! disk-resident indexes. A table can declare several dimensions, each
//! materialized as its own index, so the same record can be found by any of
//! several keys. Retention is governed by a TTL policy applied lazily while
//! iterating.
//!
//! ## Architecture
//!
//! - **Codec**: composite `(value, timestamp)` keys, see [`codec`]
//! - **Comparator**: value ascending, then timestamp descending
//! - **Store**: embedded ordered key-value engine (memtable, table files, log) per index
//! - **Dimensions**: one index per declared dimension
//! - **Table**: lifecycle, writes, point lookups and iterator factories
//! - **Iterators**: per-key [`PointIterator`] and TTL-filtering [`TraverseIterator`]
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use disktable::{Dimension, Table, TableIterator, TableOptions, TtlType};
//! use std::collections::BTreeMap;
//!
//! # fn main() -> Result<(), disktable::Error> {
//! let mapping = BTreeMap::from([("card".to_string(), 0), ("mcc".to_string(), 1)]);
//! let table = Table::new("txn", 1, 0, mapping, 3, TtlType::LatestTime, TableOptions::new("./data"));
//! table.init()?;
//!
//! // Single-dimension write into the primary index
//! table.put(b"card-1", 1000, b"payload")?;
//!
//! // Fan a record out to every dimension
//! table.put_dimensions(
//!     1001,
//!     b"payload",
//!     &[Dimension::new("card", "card-1"), Dimension::new("mcc", "5411")],
//! )?;
//!
//! // Exact lookup through the secondary dimension
//! if let Some(value) = table.get_from(1, b"5411", 1001)? {
//!     println!("Found: {:?}", value);
//! }
//!
//! // Newest versions of one key
//! let mut it = table.new_iterator(b"card-1")?;
//! it.seek_to_first();
//! while it.valid() {
//!     println!("{} => {:?}", it.key(), it.value());
//!     it.next();
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod codec;
pub mod comparator;
pub mod config;
pub mod dimension;
pub mod error;
pub mod iterator;
pub mod manifest;
pub mod store;
pub mod table;

// Re-exports
pub use config::{Options, TableOptions, TtlType};
pub use error::{Error, Result};
pub use iterator::{Expiry, PointIterator, TableIterator, TraverseIterator};
pub use table::{Dimension, Table};
