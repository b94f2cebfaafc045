//! Table iterators.
//!
//! Two kinds of iterator share the [`TableIterator`] surface:
//!
//! - [`PointIterator`]: every version of one primary key in one index,
//!   newest first, without TTL filtering.
//! - [`TraverseIterator`]: every key of one index, applying the table's TTL
//!   policy as it walks.
//!
//! Both start unpositioned; call `seek_to_first` (or a `seek`) before reading.
//!
//! ```rust,no_run
//! use disktable::{Table, TableIterator, TableOptions, TtlType};
//! use std::collections::BTreeMap;
//!
//! # fn main() -> Result<(), disktable::Error> {
//! let table = Table::new("t1", 1, 0, BTreeMap::new(), 0, TtlType::AbsoluteTime, TableOptions::new("./tables"));
//! table.init()?;
//! let mut it = table.new_traverse_iterator(0)?;
//! it.seek_to_first();
//! while it.valid() {
//!     println!("{:?}@{} => {:?}", it.pk(), it.key(), it.value());
//!     it.next();
//! }
//! it.status()?;
//! # Ok(())
//! # }
//! ```

mod point;
mod traverse;

pub use point::PointIterator;
pub use traverse::{Expiry, TraverseIterator};

use crate::error::Result;
use bytes::Bytes;

/// Cursor state shared by both iterator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Unpositioned,
    Positioned,
    Exhausted,
}

/// Common surface of table iterators.
///
/// The accessors (`value`, `pk`, `key`) panic when the iterator is not
/// [`valid`](TableIterator::valid).
pub trait TableIterator {
    /// Returns true if the iterator is positioned at a visible version.
    fn valid(&self) -> bool;

    /// Advances to the next visible version.
    fn next(&mut self);

    /// Value of the current version.
    fn value(&self) -> &Bytes;

    /// Primary (or dimension) key of the current version.
    fn pk(&self) -> &[u8];

    /// Timestamp of the current version.
    fn key(&self) -> u64;

    /// Positions at the first visible version.
    fn seek_to_first(&mut self);

    /// `Ok` unless the iterator stopped on a key it could not decode or on
    /// a table file it could not read.
    fn status(&self) -> Result<()>;
}
