//! Whole-index iterator with TTL filtering.
//!
//! Versions of a key are stored newest first, which makes both retention
//! policies monotone within a key: once one version is expired, by age or by
//! count, every older version of that key is expired too. The iterator uses
//! this to jump straight to the next key instead of stepping through the
//! expired tail.

use super::{State, TableIterator};
use crate::codec;
use crate::config::TtlType;
use crate::error::{Error, Result};
use crate::store::IndexCursor;
use bytes::Bytes;

/// Expiry rule captured when a traverse iterator is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Nothing expires.
    Never,
    /// Versions with a timestamp strictly below this bound are expired.
    Before(u64),
    /// Only the first `n` versions of each key are live.
    Latest(u64),
}

impl Expiry {
    /// Builds the rule for `ttl_type`/`ttl` as seen at `now_ms`.
    ///
    /// A `ttl` of 0 disables expiry for either policy. For
    /// [`TtlType::AbsoluteTime`] a version is expired once
    /// `now_ms - ts > ttl * unit_ms`.
    pub fn new(ttl_type: TtlType, ttl: u64, now_ms: u64, unit_ms: u64) -> Self {
        if ttl == 0 {
            return Expiry::Never;
        }
        match ttl_type {
            TtlType::AbsoluteTime => Expiry::Before(now_ms.saturating_sub(ttl.saturating_mul(unit_ms))),
            TtlType::LatestTime => Expiry::Latest(ttl),
        }
    }

    /// Whether the `record_idx`-th version (0 = newest) at `ts` is expired.
    pub fn is_expired(&self, ts: u64, record_idx: u64) -> bool {
        match *self {
            Expiry::Never => false,
            Expiry::Before(bound) => ts < bound,
            Expiry::Latest(limit) => record_idx >= limit,
        }
    }
}

/// Walks every live version of an index in comparator order.
pub struct TraverseIterator {
    cursor: IndexCursor,
    expiry: Expiry,
    state: State,
    pk: Vec<u8>,
    ts: u64,
    /// Position of the current version within its key (0 = newest)
    record_idx: u64,
    /// Versions of `pk` already passed; the next same-key entry gets this index
    seen: u64,
    error: Option<String>,
}

impl TraverseIterator {
    pub(crate) fn new(cursor: IndexCursor, expiry: Expiry) -> Self {
        Self {
            cursor,
            expiry,
            state: State::Unpositioned,
            pk: Vec::new(),
            ts: 0,
            record_idx: 0,
            seen: 0,
            error: None,
        }
    }

    /// Positions at the first live version at or after `(pk, ts)`.
    ///
    /// The per-key counter is reset for `pk`. Under a latest-N policy the
    /// newer versions of `pk` that the seek passes over are counted, so the
    /// retained window stays anchored at the key's newest version.
    pub fn seek(&mut self, pk: &[u8], ts: u64) {
        self.pk.clear();
        self.pk.extend_from_slice(pk);
        self.seen = 0;

        if let Expiry::Latest(_) = self.expiry {
            self.cursor.seek(&codec::seek_key(pk));
            while self.cursor.valid() {
                match codec::decode(self.cursor.key()) {
                    Ok((value, version)) if value == pk && version > ts => {
                        self.seen += 1;
                        self.cursor.next();
                    }
                    _ => break,
                }
            }
        } else {
            self.cursor.seek(&codec::encode(pk, ts));
        }
        self.land();
    }

    /// Expiry rule this iterator applies.
    pub fn expiry(&self) -> Expiry {
        self.expiry
    }

    /// Settles on the first live version at or after the cursor.
    fn land(&mut self) {
        loop {
            if !self.cursor.valid() {
                self.state = State::Exhausted;
                return;
            }

            let (same_pk, ts) = match codec::decode(self.cursor.key()) {
                Ok((value, ts)) => (value == self.pk.as_slice(), ts),
                Err(e) => {
                    log::warn!("Traverse iterator stopped on undecodable key: {}", e);
                    self.error = Some(e.to_string());
                    self.state = State::Exhausted;
                    return;
                }
            };

            let idx = if same_pk {
                self.seen
            } else {
                let key = self.cursor.key();
                self.pk.clear();
                self.pk.extend_from_slice(&key[..key.len() - codec::TRAILER_SIZE]);
                0
            };
            self.record_idx = idx;
            self.seen = idx + 1;
            self.ts = ts;

            if !self.expiry.is_expired(ts, idx) {
                self.state = State::Positioned;
                return;
            }
            self.next_pk();
        }
    }

    /// Moves the cursor to the first version of the key after `pk`.
    fn next_pk(&mut self) {
        self.cursor.seek(&codec::encode(&self.pk, 0));
        let on_same_key = self.cursor.valid()
            && matches!(codec::value_of(self.cursor.key()), Ok(value) if value == self.pk.as_slice());
        if on_same_key {
            self.cursor.next();
        }
    }
}

impl TableIterator for TraverseIterator {
    fn valid(&self) -> bool {
        self.state == State::Positioned
    }

    fn next(&mut self) {
        if self.state == State::Positioned {
            self.cursor.next();
            self.land();
        }
    }

    fn value(&self) -> &Bytes {
        assert!(self.valid(), "Iterator not valid");
        self.cursor.value()
    }

    fn pk(&self) -> &[u8] {
        assert!(self.valid(), "Iterator not valid");
        &self.pk
    }

    fn key(&self) -> u64 {
        assert!(self.valid(), "Iterator not valid");
        self.ts
    }

    fn seek_to_first(&mut self) {
        self.pk.clear();
        self.seen = 0;
        self.cursor.seek_to_first();
        self.land();
    }

    fn status(&self) -> Result<()> {
        self.cursor.status()?;
        match &self.error {
            Some(msg) => Err(Error::decode(msg.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::comparator::VERSION_COMPARATOR;
    use crate::config::Options;
    use crate::store::OrderedIndex;
    use tempfile::TempDir;

    fn index_with(dir: &TempDir, entries: &[(&str, u64)]) -> OrderedIndex {
        let index = OrderedIndex::open(dir.path(), "idx0", &VERSION_COMPARATOR, &Options::default()).unwrap();
        for (pk, ts) in entries {
            index.put(&encode(pk.as_bytes(), *ts), b"v").unwrap();
        }
        index
    }

    fn collect(it: &mut TraverseIterator) -> Vec<(String, u64)> {
        let mut out = Vec::new();
        while it.valid() {
            out.push((String::from_utf8(it.pk().to_vec()).unwrap(), it.key()));
            it.next();
        }
        out
    }

    fn pairs(items: &[(&str, u64)]) -> Vec<(String, u64)> {
        items.iter().map(|(pk, ts)| (pk.to_string(), *ts)).collect()
    }

    #[test]
    fn test_expiry_rules() {
        assert_eq!(Expiry::new(TtlType::AbsoluteTime, 0, 1000, 1), Expiry::Never);
        assert_eq!(Expiry::new(TtlType::LatestTime, 0, 1000, 1), Expiry::Never);
        assert_eq!(Expiry::new(TtlType::AbsoluteTime, 10, 1000, 60), Expiry::Before(400));
        assert_eq!(Expiry::new(TtlType::AbsoluteTime, 10, 100, 60), Expiry::Before(0));
        assert_eq!(Expiry::new(TtlType::LatestTime, 3, 1000, 60), Expiry::Latest(3));

        let rule = Expiry::Before(400);
        assert!(rule.is_expired(399, 0));
        assert!(!rule.is_expired(400, 0));
        assert!(Expiry::Latest(2).is_expired(0, 2));
        assert!(!Expiry::Latest(2).is_expired(0, 1));
    }

    #[test]
    fn test_full_scan_without_expiry() {
        let dir = TempDir::new().unwrap();
        let index = index_with(&dir, &[("b", 1), ("a", 1), ("a", 2)]);

        let mut it = TraverseIterator::new(index.cursor(), Expiry::Never);
        assert!(!it.valid());
        it.seek_to_first();
        assert_eq!(collect(&mut it), pairs(&[("a", 2), ("a", 1), ("b", 1)]));
        assert!(it.status().is_ok());
    }

    #[test]
    fn test_latest_n_caps_each_key() {
        let dir = TempDir::new().unwrap();
        let index = index_with(
            &dir,
            &[("a", 1), ("a", 2), ("a", 3), ("a", 4), ("b", 7), ("c", 5), ("c", 6), ("c", 8)],
        );

        let mut it = TraverseIterator::new(index.cursor(), Expiry::Latest(2));
        it.seek_to_first();
        assert_eq!(collect(&mut it), pairs(&[("a", 4), ("a", 3), ("b", 7), ("c", 8), ("c", 6)]));
    }

    #[test]
    fn test_absolute_skips_old_versions_and_whole_keys() {
        let dir = TempDir::new().unwrap();
        let index = index_with(&dir, &[("a", 50), ("a", 150), ("b", 10), ("c", 100), ("c", 99)]);

        let mut it = TraverseIterator::new(index.cursor(), Expiry::Before(100));
        it.seek_to_first();
        assert_eq!(collect(&mut it), pairs(&[("a", 150), ("c", 100)]));
    }

    #[test]
    fn test_first_key_fully_expired() {
        let dir = TempDir::new().unwrap();
        let index = index_with(&dir, &[("a", 1), ("a", 2), ("b", 200)]);

        let mut it = TraverseIterator::new(index.cursor(), Expiry::Before(100));
        it.seek_to_first();
        assert!(it.valid());
        assert_eq!(it.pk(), b"b");
        assert_eq!(it.key(), 200);
    }

    #[test]
    fn test_expired_version_at_timestamp_zero() {
        let dir = TempDir::new().unwrap();
        let index = index_with(&dir, &[("a", 0), ("a", 5), ("b", 0)]);

        let mut it = TraverseIterator::new(index.cursor(), Expiry::Latest(1));
        it.seek_to_first();
        assert_eq!(collect(&mut it), pairs(&[("a", 5), ("b", 0)]));
    }

    #[test]
    fn test_seek_counts_newer_versions_under_latest() {
        let dir = TempDir::new().unwrap();
        let index = index_with(&dir, &[("a", 1), ("a", 2), ("a", 3), ("b", 1)]);

        let mut it = TraverseIterator::new(index.cursor(), Expiry::Latest(2));
        it.seek(b"a", 2);
        assert_eq!(collect(&mut it), pairs(&[("a", 2), ("b", 1)]));

        // version 1 is the third newest, so seeking to it skips to "b"
        it.seek(b"a", 1);
        assert_eq!(collect(&mut it), pairs(&[("b", 1)]));
    }

    #[test]
    fn test_seek_under_absolute() {
        let dir = TempDir::new().unwrap();
        let index = index_with(&dir, &[("a", 300), ("a", 200), ("a", 50), ("b", 400)]);

        let mut it = TraverseIterator::new(index.cursor(), Expiry::Before(100));
        it.seek(b"a", 250);
        assert_eq!(collect(&mut it), pairs(&[("a", 200), ("b", 400)]));

        it.seek(b"aa", u64::MAX);
        assert_eq!(collect(&mut it), pairs(&[("b", 400)]));
    }

    #[test]
    fn test_empty_index() {
        let dir = TempDir::new().unwrap();
        let index = index_with(&dir, &[]);

        let mut it = TraverseIterator::new(index.cursor(), Expiry::Latest(1));
        it.seek_to_first();
        assert!(!it.valid());
        it.next();
        assert!(!it.valid());
    }
}
