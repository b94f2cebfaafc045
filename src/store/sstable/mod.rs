//! Immutable sorted table files.
//!
//! A memtable that outgrows its budget is written out as one table file, and
//! merges rewrite several table files into one. Entries inside a file follow
//! the comparator of the owning index; nothing here assumes bytewise order.
//!
//! ## File Format
//!
//! ```text
//! [Data Block 1]
//! ...
//! [Data Block N]
//! [Index Block]     // last key of every data block -> its handle
//! [Footer: 48B]
//! ```
//!
//! Every block is followed by a 4-byte CRC32 of its contents.
//!
//! ## Block Format
//!
//! ```text
//! entry:   [shared: u32][unshared: u32][value_len: u32][key suffix][value]
//! trailer: [restart offsets: u32 * n][n: u32]
//! ```
//!
//! Keys are prefix-compressed against the previous key, with a full key at
//! every restart point.

pub mod block;
pub mod builder;
pub mod footer;
pub mod reader;

pub use block::{Block, BlockBuilder, BlockIterator};
pub use builder::SSTableBuilder;
pub use footer::{BlockHandle, Footer};
pub use reader::{SSTableIterator, SSTableReader};

/// Footer size in bytes (fixed)
pub const FOOTER_SIZE: usize = 48;

/// Magic number for table files ("DTABLE01")
pub const MAGIC_NUMBER: u64 = 0x3130_454c_4241_5444;

/// Entries between two restart points
pub const RESTART_INTERVAL: usize = 16;

/// Trailing checksum after every block
pub const BLOCK_TRAILER_SIZE: usize = 4;

/// File name of table number `number`.
pub fn table_file_name(number: u64) -> String {
    format!("{:06}.sst", number)
}

/// Parses a table file name back into its number.
pub fn parse_table_file_name(name: &str) -> Option<u64> {
    name.strip_suffix(".sst")?.parse().ok()
}
