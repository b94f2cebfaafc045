//! # Composite Key Format
//!
//! Every entry in a dimension index is stored under a composite key that
//! joins the dimension value with the record timestamp.
//!
//! ## Format
//!
//! ```text
//! CompositeKey:
//!   [value: bytes] [separator: 0x7C] [timestamp: u64 big-endian]
//! ```
//!
//! The timestamp trailer has a fixed width, so decoding splits off the last
//! nine bytes instead of searching for the separator. A value may therefore
//! contain the separator byte without making the encoding ambiguous.
//!
//! ## Ordering
//!
//! Raw composite keys are not meant to be compared bytewise. Indexes order
//! them with [`VersionComparator`](crate::comparator::VersionComparator):
//! value ascending, then timestamp descending.

use crate::error::{Error, Result};

/// Separator byte between the value and the timestamp trailer.
pub const SEPARATOR: u8 = b'|';

/// Length of the trailer (separator + timestamp).
pub const TRAILER_SIZE: usize = 9;

/// Encodes `(value, ts)` into a composite key.
///
/// # Example
///
/// ```rust
/// use disktable::codec;
///
/// let key = codec::encode(b"card1", 42);
/// assert_eq!(codec::decode(&key).unwrap(), (&b"card1"[..], 42));
/// ```
pub fn encode(value: &[u8], ts: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(value.len() + TRAILER_SIZE);
    buf.extend_from_slice(value);
    buf.push(SEPARATOR);
    buf.extend_from_slice(&ts.to_be_bytes());
    buf
}

/// Decodes a composite key into its value and timestamp.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the key is shorter than the trailer or the
/// separator is not in front of the timestamp.
pub fn decode(key: &[u8]) -> Result<(&[u8], u64)> {
    if key.len() < TRAILER_SIZE {
        return Err(Error::decode(format!(
            "composite key too short: {} bytes",
            key.len()
        )));
    }

    let split = key.len() - TRAILER_SIZE;
    if key[split] != SEPARATOR {
        return Err(Error::decode(format!("missing separator at offset {}", split)));
    }

    let ts_bytes: [u8; 8] = key[split + 1..]
        .try_into()
        .map_err(|_| Error::decode("truncated timestamp"))?;

    Ok((&key[..split], u64::from_be_bytes(ts_bytes)))
}

/// Returns the value component of a composite key.
pub fn value_of(key: &[u8]) -> Result<&[u8]> {
    decode(key).map(|(value, _)| value)
}

/// Returns the key that sorts before every version of `value`.
pub fn seek_key(value: &[u8]) -> Vec<u8> {
    encode(value, u64::MAX)
}
