//! Log record codec.
//!
//! Every mutation appends one record to the active data file:
//!
//! ```text
//! [crc32: u32 LE][type: u8][varint key_size][varint value_size][key][value]
//! ```
//!
//! The CRC (CRC32-IEEE) covers every byte after the CRC slot. A region of
//! zero bytes decodes to an all-zero header, which scanners treat as logical
//! end-of-file — pre-allocated file tails look exactly like that.

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher;

use crate::varint;

/// Upper bound on an encoded record header: CRC + type + two maximal
/// `u32` varints.
pub const MAX_HEADER_SIZE: usize = 4 + 1 + varint::MAX_VARINT32_LEN * 2;

/// Bytes a buffer must hold before header decoding can even start
/// (CRC + type).
pub const MIN_HEADER_PREFIX: usize = 5;

/// What a record means to the key directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// A live key/value pair.
    Normal = 0,
    /// The key was deleted; the record carries no value.
    Tombstone = 1,
    /// Marks every record sharing its sequence number as committed.
    TxnFinished = 2,
}

impl RecordType {
    pub fn from_u8(byte: u8) -> Option<RecordType> {
        match byte {
            0 => Some(RecordType::Normal),
            1 => Some(RecordType::Tombstone),
            2 => Some(RecordType::TxnFinished),
            _ => None,
        }
    }
}

/// One log record as written to (or decoded from) a data file.
///
/// `key` is the on-disk key, i.e. the user key prefixed with a varint
/// sequence number; framing and parsing of that prefix is the engine's
/// business, not the codec's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: RecordType,
}

impl LogRecord {
    /// Encodes the record into its on-disk form. The returned buffer's
    /// length is the record's size on disk.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + self.key.len() + self.value.len());
        buf.extend_from_slice(&[0u8; 4]);
        buf.push(self.rec_type as u8);
        varint::encode_u64(self.key.len() as u64, &mut buf);
        varint::encode_u64(self.value.len() as u64, &mut buf);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let mut hasher = Hasher::new();
        hasher.update(&buf[4..]);
        LittleEndian::write_u32(&mut buf[..4], hasher.finalize());
        buf
    }
}

/// A decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordHeader {
    pub crc: u32,
    pub rec_type: u8,
    pub key_size: u32,
    pub value_size: u32,
}

impl RecordHeader {
    /// True for the all-zero header that marks logical end-of-file.
    pub fn is_end_marker(&self) -> bool {
        self.crc == 0 && self.rec_type == 0 && self.key_size == 0 && self.value_size == 0
    }
}

/// Decodes a record header from the front of `buf`, returning the header and
/// its encoded length. Returns `None` when the buffer is too short to hold a
/// complete header — scanners treat that as end-of-data.
pub fn decode_header(buf: &[u8]) -> Option<(RecordHeader, usize)> {
    if buf.len() < MIN_HEADER_PREFIX {
        return None;
    }
    let crc = LittleEndian::read_u32(&buf[..4]);
    let rec_type = buf[4];
    let mut rest = &buf[MIN_HEADER_PREFIX..];
    let key_size = varint::decode_u64(&mut rest)?;
    let value_size = varint::decode_u64(&mut rest)?;
    if key_size > u64::from(u32::MAX) || value_size > u64::from(u32::MAX) {
        return None;
    }
    let header_size = buf.len() - rest.len();
    Some((
        RecordHeader {
            crc,
            rec_type,
            key_size: key_size as u32,
            value_size: value_size as u32,
        },
        header_size,
    ))
}

/// CRC32-IEEE over the post-CRC header bytes followed by key and value —
/// what readers compare against the stored CRC.
pub fn record_crc(record: &LogRecord, header_tail: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(header_tail);
    hasher.update(&record.key);
    hasher.update(&record.value);
    hasher.finalize()
}

/// Where a record lives on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub file_id: u32,
    pub offset: i64,
    pub size: u32,
}

/// Encodes a position as three varints — the hint-file payload format.
pub fn encode_position(pos: &Position) -> Vec<u8> {
    let mut buf = Vec::with_capacity(varint::MAX_VARINT32_LEN * 2 + varint::MAX_VARINT64_LEN);
    varint::encode_u64(u64::from(pos.file_id), &mut buf);
    varint::encode_i64(pos.offset, &mut buf);
    varint::encode_u64(u64::from(pos.size), &mut buf);
    buf
}

/// Decodes a position written by [`encode_position`].
pub fn decode_position(buf: &[u8]) -> Option<Position> {
    let mut rest = buf;
    let file_id = varint::decode_u64(&mut rest)?;
    let offset = varint::decode_i64(&mut rest)?;
    let size = varint::decode_u64(&mut rest)?;
    if file_id > u64::from(u32::MAX) || size > u64::from(u32::MAX) {
        return None;
    }
    Some(Position {
        file_id: file_id as u32,
        offset,
        size: size as u32,
    })
}
