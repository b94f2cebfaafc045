//! Key comparators plugged into ordered indexes.
//!
//! An index is created with a comparator and keeps it for the life of its
//! on-disk data. The comparator name is recorded next to the data and checked
//! on every open, since reopening with a different ordering would silently
//! break the sort order of existing entries.

use crate::codec;
use std::cmp::Ordering;
use std::fmt;

/// Total order over raw index keys.
///
/// Implementations must be stateless and stable across restarts: the same two
/// byte strings must always compare the same way.
pub trait KeyComparator: Send + Sync {
    /// Stable identifier persisted with every index that uses this comparator.
    fn name(&self) -> &'static str;

    /// Compares two raw keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

impl fmt::Debug for dyn KeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Plain lexicographic byte order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn name(&self) -> &'static str {
        "disktable.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Orders composite keys by value ascending, then timestamp descending.
///
/// For a fixed value, an ascending scan therefore visits versions from newest
/// to oldest, and all versions of one value are contiguous.
///
/// Keys that fail to decode sort before every decodable key and compare
/// bytewise among themselves. Tables never write such keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct VersionComparator;

impl KeyComparator for VersionComparator {
    fn name(&self) -> &'static str {
        "disktable.VersionComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (codec::decode(a), codec::decode(b)) {
            (Ok((value_a, ts_a)), Ok((value_b, ts_b))) => match value_a.cmp(value_b) {
                Ordering::Equal => ts_b.cmp(&ts_a),
                other => other,
            },
            (Err(_), Err(_)) => a.cmp(b),
            (Err(_), Ok(_)) => Ordering::Less,
            (Ok(_), Err(_)) => Ordering::Greater,
        }
    }
}

/// Shared instance used by every dimension index.
pub static VERSION_COMPARATOR: VersionComparator = VersionComparator;

/// Shared bytewise instance.
pub static BYTEWISE_COMPARATOR: BytewiseComparator = BytewiseComparator;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;

    #[test]
    fn test_value_order_wins_over_timestamp() {
        let cmp = VersionComparator;
        assert_eq!(cmp.compare(&encode(b"a", 1), &encode(b"b", 100)), Ordering::Less);
        assert_eq!(cmp.compare(&encode(b"b", 1), &encode(b"a", 100)), Ordering::Greater);
    }

    #[test]
    fn test_newer_timestamp_sorts_first() {
        let cmp = VersionComparator;
        assert_eq!(cmp.compare(&encode(b"k", 30), &encode(b"k", 20)), Ordering::Less);
        assert_eq!(cmp.compare(&encode(b"k", 20), &encode(b"k", 30)), Ordering::Greater);
        assert_eq!(cmp.compare(&encode(b"k", 20), &encode(b"k", 20)), Ordering::Equal);
    }

    #[test]
    fn test_prefix_values_stay_grouped() {
        // "a" is a prefix of "a|"; every version of "a" must come first.
        let cmp = VersionComparator;
        assert_eq!(cmp.compare(&encode(b"a", 0), &encode(b"a|", u64::MAX)), Ordering::Less);
    }

    #[test]
    fn test_complete_ordering() {
        let cmp = VersionComparator;
        let mut keys = vec![
            encode(b"key2", 100),
            encode(b"key1", 50),
            encode(b"key1", 150),
            encode(b"key1", 100),
        ];
        keys.sort_by(|a, b| cmp.compare(a, b));

        let decoded: Vec<_> = keys.iter().map(|k| codec::decode(k).unwrap()).collect();
        assert_eq!(
            decoded,
            vec![(&b"key1"[..], 150), (&b"key1"[..], 100), (&b"key1"[..], 50), (&b"key2"[..], 100)]
        );
    }

    #[test]
    fn test_malformed_keys_fall_back_to_bytes() {
        let cmp = VersionComparator;
        assert_eq!(cmp.compare(b"x", b"y"), Ordering::Less);
    }

    #[test]
    fn test_malformed_keys_sort_before_composite_keys() {
        let cmp = VersionComparator;
        let a = encode(b"", 0);
        let b = vec![0xff, 0xff];
        let c = encode(b"\x01", 0);

        assert_eq!(cmp.compare(&b, &a), Ordering::Less);
        assert_eq!(cmp.compare(&b, &c), Ordering::Less);
        assert_eq!(cmp.compare(&a, &c), Ordering::Less);
        assert_eq!(cmp.compare(&c, &b), Ordering::Greater);
    }

    #[test]
    fn test_names_are_distinct() {
        assert_ne!(VERSION_COMPARATOR.name(), BYTEWISE_COMPARATOR.name());
    }
}
