//! # MemTable - recent writes of one index
//!
//! A concurrent SkipList ordered by the index comparator. Deletes are stored
//! as tombstones so that they shadow older entries in table files until the
//! next full merge drops both.
//!
//! Writers are serialized by the owning index; readers run lock-free.

use crate::comparator::KeyComparator;
use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering as AtomicOrdering};

/// Per-entry bookkeeping overhead counted towards the memtable size.
const ENTRY_OVERHEAD: usize = 16;

/// SkipList key carrying the comparator that orders it.
#[derive(Clone)]
pub(crate) struct OrdKey {
    bytes: Bytes,
    comparator: &'static dyn KeyComparator,
}

impl OrdKey {
    pub(crate) fn new(bytes: Bytes, comparator: &'static dyn KeyComparator) -> Self {
        Self { bytes, comparator }
    }

    pub(crate) fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

impl PartialEq for OrdKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrdKey {}

impl PartialOrd for OrdKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparator.compare(&self.bytes, &other.bytes)
    }
}

/// What an index holds under a key: a value or a deletion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Slot {
    Value(Bytes),
    Tombstone,
}

impl Slot {
    const TOMBSTONE_TAG: u8 = 0;
    const VALUE_TAG: u8 = 1;

    /// Encodes the slot as a table file value: a tag byte, then the bytes.
    pub(crate) fn encode(&self) -> Vec<u8> {
        match self {
            Slot::Tombstone => vec![Self::TOMBSTONE_TAG],
            Slot::Value(value) => {
                let mut buf = Vec::with_capacity(value.len() + 1);
                buf.push(Self::VALUE_TAG);
                buf.extend_from_slice(value);
                buf
            }
        }
    }

    /// Decodes a table file value; `None` for an unknown tag.
    pub(crate) fn decode(data: &[u8]) -> Option<Self> {
        match data.split_first() {
            Some((&Self::TOMBSTONE_TAG, [])) => Some(Slot::Tombstone),
            Some((&Self::VALUE_TAG, value)) => Some(Slot::Value(Bytes::copy_from_slice(value))),
            _ => None,
        }
    }

    pub(crate) fn is_value(&self) -> bool {
        matches!(self, Slot::Value(_))
    }
}

/// In-memory sorted buffer of the most recent writes.
pub(crate) struct MemTable {
    data: SkipMap<OrdKey, Slot>,
    comparator: &'static dyn KeyComparator,
    /// Approximate size in bytes (keys + values + overhead)
    size: AtomicUsize,
    /// Net change in live keys this memtable contributes
    live_delta: AtomicI64,
}

impl MemTable {
    pub(crate) fn new(comparator: &'static dyn KeyComparator) -> Self {
        Self {
            data: SkipMap::new(),
            comparator,
            size: AtomicUsize::new(0),
            live_delta: AtomicI64::new(0),
        }
    }

    /// Inserts or overwrites `key`. Callers serialize writes.
    pub(crate) fn put(&self, key: Bytes, value: Bytes) {
        let delta = match self.slot(&key) {
            Some(Slot::Value(_)) => 0,
            _ => 1,
        };
        self.insert(key, Slot::Value(value), delta);
    }

    /// Records a tombstone for `key`. Callers serialize writes and only
    /// delete keys that are visible in the index.
    pub(crate) fn delete(&self, key: Bytes) {
        let delta = match self.slot(&key) {
            Some(Slot::Tombstone) => 0,
            _ => -1,
        };
        self.insert(key, Slot::Tombstone, delta);
    }

    fn insert(&self, key: Bytes, slot: Slot, delta: i64) {
        let added = key.len()
            + match &slot {
                Slot::Value(value) => value.len(),
                Slot::Tombstone => 0,
            }
            + ENTRY_OVERHEAD;
        self.data.insert(OrdKey::new(key, self.comparator), slot);
        self.size.fetch_add(added, AtomicOrdering::Relaxed);
        self.live_delta.fetch_add(delta, AtomicOrdering::Relaxed);
    }

    /// Slot stored under exactly `key`, if any.
    pub(crate) fn slot(&self, key: &[u8]) -> Option<Slot> {
        let probe = OrdKey::new(Bytes::copy_from_slice(key), self.comparator);
        self.data.get(&probe).map(|entry| entry.value().clone())
    }

    /// First entry after `bound` (or the first entry for `Unbounded`).
    pub(crate) fn lower_bound(&self, bound: Bound<&[u8]>) -> Option<(Bytes, Slot)> {
        let probe;
        let bound = match bound {
            Bound::Included(key) => {
                probe = OrdKey::new(Bytes::copy_from_slice(key), self.comparator);
                Bound::Included(&probe)
            }
            Bound::Excluded(key) => {
                probe = OrdKey::new(Bytes::copy_from_slice(key), self.comparator);
                Bound::Excluded(&probe)
            }
            Bound::Unbounded => Bound::Unbounded,
        };
        self.data
            .lower_bound(bound)
            .map(|entry| (entry.key().bytes().clone(), entry.value().clone()))
    }

    /// Every entry in comparator order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Bytes, Slot)> + '_ {
        self.data
            .iter()
            .map(|entry| (entry.key().bytes().clone(), entry.value().clone()))
    }

    pub(crate) fn approximate_size(&self) -> usize {
        self.size.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn live_delta(&self) -> i64 {
        self.live_delta.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
