//! Iterator over the versions of a single key.

use super::{State, TableIterator};
use crate::codec;
use crate::error::{Error, Result};
use crate::store::IndexCursor;
use bytes::Bytes;

/// Walks every version of one key in one index, newest first.
///
/// No TTL filtering is applied. Once the underlying cursor moves past the
/// key the iterator is exhausted and `next` has no further effect; only a new
/// seek repositions it.
pub struct PointIterator {
    cursor: IndexCursor,
    pk: Vec<u8>,
    ts: u64,
    state: State,
    error: Option<String>,
}

impl PointIterator {
    pub(crate) fn new(cursor: IndexCursor, pk: &[u8]) -> Self {
        Self { cursor, pk: pk.to_vec(), ts: 0, state: State::Unpositioned, error: None }
    }

    /// Positions at the newest version whose timestamp is `<= ts`.
    pub fn seek(&mut self, ts: u64) {
        self.cursor.seek(&codec::encode(&self.pk, ts));
        self.settle();
    }

    fn settle(&mut self) {
        if !self.cursor.valid() {
            self.state = State::Exhausted;
            return;
        }
        match codec::decode(self.cursor.key()) {
            Ok((value, ts)) if value == self.pk.as_slice() => {
                self.ts = ts;
                self.state = State::Positioned;
            }
            Ok(_) => self.state = State::Exhausted,
            Err(e) => {
                log::warn!("Point iterator stopped on undecodable key: {}", e);
                self.error = Some(e.to_string());
                self.state = State::Exhausted;
            }
        }
    }
}

impl TableIterator for PointIterator {
    fn valid(&self) -> bool {
        self.state == State::Positioned
    }

    fn next(&mut self) {
        if self.state == State::Positioned {
            self.cursor.next();
            self.settle();
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
        self.cursor.seek(&codec::seek_key(&self.pk));
        self.settle();
    }

    fn status(&self) -> Result<()> {
        self.cursor.status()?;
        match &self.error {
            Some(msg) => Err(Error::decode(msg.clone())),
            None => Ok(()),
        }
    }
}
