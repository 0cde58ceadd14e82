//! # datafile — the on-disk vocabulary of emberkv
//!
//! Everything that touches bytes on disk lives here:
//!
//! - [`varint`]: LEB128 variable-length integers (unsigned and zigzag),
//!   used for record header sizes, the sequence-number key framing, and
//!   hint-file position payloads.
//! - [`record`]: the log record codec. Every mutation is one record:
//!
//!   ```text
//!   [crc32: u32 LE][type: u8][varint key_size][varint value_size][key][value]
//!   ```
//!
//!   The CRC covers every byte after the CRC slot and is verified on every
//!   read.
//! - [`file`]: [`DataFile`](file::DataFile), a numbered append-only segment
//!   (`000000001.data`, …) that tracks its write offset and reads one record
//!   at a given byte offset. The same type backs the auxiliary files the
//!   engine keeps beside the segments: the hint file, the merge-finished
//!   marker, and the seq-no sidecar.

pub mod file;
pub mod record;
pub mod varint;

pub use file::DataFile;
pub use fio::{IoBackend, IoType};
pub use record::{LogRecord, Position, RecordType};

use std::io;
use thiserror::Error;

/// Errors produced while encoding, decoding, or reading data files.
#[derive(Debug, Error)]
pub enum DataFileError {
    /// An underlying IO failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record's CRC did not match its content.
    #[error("invalid crc, log record may be corrupted")]
    InvalidCrc,

    /// A record decoded into something structurally impossible.
    #[error("malformed log record: {0}")]
    Corrupted(&'static str),
}

pub type Result<T> = std::result::Result<T, DataFileError>;
