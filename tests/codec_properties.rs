// Property tests for the composite key encoding and its ordering

use disktable::codec::{decode, encode};
use disktable::comparator::{KeyComparator, VERSION_COMPARATOR};
use proptest::prelude::*;
use std::cmp::Ordering;

proptest! {
    #[test]
    fn prop_round_trip(value in proptest::collection::vec(any::<u8>(), 0..64), ts in any::<u64>()) {
        let key = encode(&value, ts);
        let (decoded, decoded_ts) = decode(&key).unwrap();
        prop_assert_eq!(decoded, value.as_slice());
        prop_assert_eq!(decoded_ts, ts);
    }

    #[test]
    fn prop_value_order_dominates(
        a in proptest::collection::vec(any::<u8>(), 1..32),
        b in proptest::collection::vec(any::<u8>(), 1..32),
        t1 in any::<u64>(),
        t2 in any::<u64>(),
    ) {
        prop_assume!(a != b);
        let expected = a.cmp(&b);
        prop_assert_eq!(VERSION_COMPARATOR.compare(&encode(&a, t1), &encode(&b, t2)), expected);
    }

    #[test]
    fn prop_newer_sorts_first(
        value in proptest::collection::vec(any::<u8>(), 1..32),
        t1 in any::<u64>(),
        t2 in any::<u64>(),
    ) {
        prop_assume!(t1 != t2);
        let (newer, older) = if t1 > t2 { (t1, t2) } else { (t2, t1) };
        prop_assert_eq!(
            VERSION_COMPARATOR.compare(&encode(&value, newer), &encode(&value, older)),
            Ordering::Less
        );
    }

    #[test]
    fn prop_comparator_is_total(
        a in proptest::collection::vec(any::<u8>(), 0..24),
        b in proptest::collection::vec(any::<u8>(), 0..24),
    ) {
        // arbitrary bytes, decodable or not, still order consistently
        let forward = VERSION_COMPARATOR.compare(&a, &b);
        let backward = VERSION_COMPARATOR.compare(&b, &a);
        prop_assert_eq!(forward, backward.reverse());
    }

    #[test]
    fn prop_comparator_is_transitive(
        keys in proptest::collection::vec(mixed_key(), 3),
    ) {
        let (a, b, c) = (&keys[0], &keys[1], &keys[2]);
        let ab = VERSION_COMPARATOR.compare(a, b);
        let bc = VERSION_COMPARATOR.compare(b, c);
        if ab != Ordering::Greater && bc != Ordering::Greater {
            prop_assert_ne!(VERSION_COMPARATOR.compare(a, c), Ordering::Greater);
        }
        if ab != Ordering::Less && bc != Ordering::Less {
            prop_assert_ne!(VERSION_COMPARATOR.compare(a, c), Ordering::Less);
        }
    }
}

/// Either a well-formed composite key or arbitrary short bytes.
fn mixed_key() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        (proptest::collection::vec(0u8..4, 0..3), 0u64..4).prop_map(|(value, ts)| encode(&value, ts)),
        proptest::collection::vec(any::<u8>(), 0..12),
    ]
}
