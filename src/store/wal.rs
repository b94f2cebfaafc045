//! Append-only index log (write-ahead log).
//!
//! Every index persists its writes to a single log file that is replayed on
//! open. Each record is framed as:
//!
//! ```text
//! [checksum: u32 LE][length: u32 LE][payload: bincode(LogEntry)]
//! ```
//!
//! The checksum is a CRC32 of the payload. A damaged record at the very end
//! of the file is a torn write: replay stops there and the file is cut back
//! before new records are appended. Damage anywhere else fails the replay.

use super::write_batch::WriteOp;
use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Size of the record header (checksum + length).
pub const HEADER_SIZE: usize = 8;

/// File name of the index log inside an index directory.
pub const LOG_FILE: &str = "index.log";

/// A logical entry in the index log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntry {
    /// First entry of every log; pins the comparator of the index.
    Header {
        /// Name of the comparator the index was created with
        comparator: String,
    },
    /// A single put.
    Put {
        /// Raw index key
        key: Vec<u8>,
        /// Stored value
        value: Vec<u8>,
    },
    /// A single delete.
    Delete {
        /// Raw index key
        key: Vec<u8>,
    },
    /// A batch applied atomically.
    Batch(Vec<WriteOp>),
}

/// Encodes `entry` into a framed record.
pub fn encode_record(entry: &LogEntry) -> Result<Vec<u8>> {
    let payload = bincode::serialize(entry)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::invalid_argument(format!("log entry too large: {} bytes", payload.len())))?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u32_le(checksum(&payload));
    buf.put_u32_le(len);
    buf.put_slice(&payload);
    Ok(buf.to_vec())
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Appends records to an index log.
///
/// Records go straight to the file. A failed append cuts the file back to
/// its last complete record; if even that fails the writer refuses further
/// appends until the index is reopened.
pub struct LogWriter {
    path: PathBuf,
    file: File,
    file_size: u64,
    poisoned: bool,
}

impl LogWriter {
    /// Opens `path` for appending, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let file_size = file.metadata()?.len();

        Ok(Self { path, file, file_size, poisoned: false })
    }

    /// Atomically replaces the log at `path` with one holding only `header`.
    ///
    /// The new log is written and synced under a temporary name, then renamed
    /// into place. On error the existing log is untouched.
    pub fn create<P: AsRef<Path>>(path: P, header: &LogEntry) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tmp_path = path.with_extension("log.tmp");
        if tmp_path.exists() {
            std::fs::remove_file(&tmp_path)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&tmp_path)?;
        let record = encode_record(header)?;
        file.write_all(&record)?;
        file.sync_all()?;
        // the handle follows the file through the rename
        std::fs::rename(&tmp_path, &path)?;

        Ok(Self { path, file, file_size: record.len() as u64, poisoned: false })
    }

    /// Appends one entry. The record reaches the OS on return; call
    /// [`sync`](Self::sync) for durability.
    pub fn append(&mut self, entry: &LogEntry) -> Result<()> {
        if self.poisoned {
            return Err(Error::invalid_state(format!(
                "index log {:?} failed an earlier append and was not rolled back",
                self.path
            )));
        }

        let record = encode_record(entry)?;
        if let Err(e) = self.file.write_all(&record) {
            self.roll_back();
            return Err(e.into());
        }
        self.file_size += record.len() as u64;
        Ok(())
    }

    /// Cuts off whatever part of a failed record reached the file.
    fn roll_back(&mut self) {
        if let Err(e) = self.file.set_len(self.file_size) {
            log::error!("Cannot roll back index log {:?} to {} bytes: {}", self.path, self.file_size, e);
            self.poisoned = true;
        }
    }

    /// Fsyncs the file.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Length of the log file in bytes, up to the last complete record.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Returns true if the writer refuses appends.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Result of replaying a log file.
#[derive(Debug, Default)]
pub struct Replay {
    /// Entries recovered, in write order
    pub entries: Vec<LogEntry>,
    /// Byte length of the valid prefix
    pub valid_len: u64,
    /// Whether a torn record was found at the end of the file
    pub truncated: bool,
}

/// Sequential reader over an index log.
pub struct LogReader {
    reader: BufReader<File>,
    file_len: u64,
    position: u64,
    /// End offset of the record that failed to read
    damaged_end: u64,
}

impl LogReader {
    /// Opens `path` for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self { reader: BufReader::new(file), file_len, position: 0, damaged_end: 0 })
    }

    /// Reads the next entry, `Ok(None)` at a clean end of file.
    pub fn read_next(&mut self) -> Result<Option<LogEntry>> {
        let remaining = self.file_len - self.position;
        if remaining == 0 {
            return Ok(None);
        }
        self.damaged_end = self.file_len;
        if remaining < HEADER_SIZE as u64 {
            return Err(Error::corruption(format!("truncated header at offset {}", self.position)));
        }

        let mut header = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header)?;
        let mut header = &header[..];
        let expected = header.get_u32_le();
        let length = header.get_u32_le() as u64;

        let record_end = self.position + HEADER_SIZE as u64 + length;
        if record_end > self.file_len {
            return Err(Error::corruption(format!("truncated record at offset {}", self.position)));
        }
        self.damaged_end = record_end;

        let mut payload = vec![0u8; length as usize];
        self.reader.read_exact(&mut payload).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                Error::corruption(format!("truncated record at offset {}", self.position))
            } else {
                e.into()
            }
        })?;

        let actual = checksum(&payload);
        if actual != expected {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        let entry = bincode::deserialize(&payload).map_err(|e| {
            Error::corruption(format!("undecodable record at offset {}: {}", self.position, e))
        })?;
        self.position = record_end;
        Ok(Some(entry))
    }

    /// Byte offset just past the last entry read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Reads every valid entry.
    ///
    /// A damaged record that reaches the end of the file is a torn write: it
    /// ends the replay and is reported through [`Replay::truncated`]. A damaged
    /// record with more data after it fails the replay with
    /// [`Error::Corruption`].
    pub fn replay(mut self) -> Result<Replay> {
        let mut replay = Replay::default();
        loop {
            let damage = match self.read_next() {
                Ok(Some(entry)) => {
                    replay.entries.push(entry);
                    continue;
                }
                Ok(None) => break,
                Err(e @ (Error::Corruption(_) | Error::ChecksumMismatch { .. })) => e,
                Err(e) => return Err(e),
            };

            if self.damaged_end < self.file_len {
                return Err(Error::corruption(format!(
                    "index log damaged at offset {} with {} more bytes after the record: {}",
                    self.position,
                    self.file_len - self.damaged_end,
                    damage
                )));
            }
            log::warn!("Index log has a torn record at offset {}: {}", self.position, damage);
            replay.truncated = true;
            break;
        }
        replay.valid_len = self.position;
        Ok(replay)
    }
}
