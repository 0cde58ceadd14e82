//! Numbered append-only data files.
//!
//! A [`DataFile`] wraps an IO backend, remembers its write offset, and knows
//! how to read one log record at a byte offset. The engine keeps exactly one
//! writable ("active") data file; every earlier file is sealed and read-only.
//!
//! The same type also backs three single-purpose files the engine keeps in
//! the data directory: the hint file (index positions for merged segments),
//! the merge-finished marker, and the seq-no sidecar.

use std::io;
use std::path::{Path, PathBuf};

use fio::{IoBackend, IoType};

use crate::record::{
    self, decode_header, record_crc, LogRecord, Position, RecordType, MAX_HEADER_SIZE,
};
use crate::{DataFileError, Result};

/// Suffix of numbered data segments.
pub const DATA_FILE_SUFFIX: &str = ".data";
/// Hint file: `(user_key, encoded position)` records written during merge.
pub const HINT_FILE_NAME: &str = "hint-index";
/// Completion marker written as the last step of a merge.
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
/// Sidecar persisting the transaction sequence number across restarts.
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// An append-only segment (or auxiliary file) in the data directory.
#[derive(Debug)]
pub struct DataFile {
    file_id: u32,
    write_off: i64,
    path: PathBuf,
    io: IoBackend,
}

impl DataFile {
    /// Opens (or creates) the numbered data file `file_id` inside `dir`.
    ///
    /// `write_off` starts at 0; callers opening an existing file for
    /// appending must call [`set_write_off`](Self::set_write_off) with the
    /// file's size first.
    pub fn open(dir: &Path, file_id: u32, io_type: IoType) -> Result<Self> {
        Self::open_path(Self::data_file_path(dir, file_id), file_id, io_type)
    }

    /// Opens the hint file inside `dir`.
    pub fn hint_file(dir: &Path) -> Result<Self> {
        Self::open_path(dir.join(HINT_FILE_NAME), 0, IoType::Standard)
    }

    /// Opens the merge-finished marker inside `dir`.
    pub fn merge_finished_file(dir: &Path) -> Result<Self> {
        Self::open_path(dir.join(MERGE_FINISHED_FILE_NAME), 0, IoType::Standard)
    }

    /// Opens the seq-no sidecar inside `dir`.
    pub fn seq_no_file(dir: &Path) -> Result<Self> {
        Self::open_path(dir.join(SEQ_NO_FILE_NAME), 0, IoType::Standard)
    }

    /// Full path of the numbered data file `file_id` inside `dir`.
    pub fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
        dir.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
    }

    fn open_path(path: PathBuf, file_id: u32, io_type: IoType) -> Result<Self> {
        let io = IoBackend::open(&path, io_type)?;
        Ok(Self {
            file_id,
            write_off: 0,
            path,
            io,
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn write_off(&self) -> i64 {
        self.write_off
    }

    pub fn set_write_off(&mut self, off: i64) {
        self.write_off = off;
    }

    /// Current on-disk length.
    pub fn size(&self) -> Result<u64> {
        Ok(self.io.size()?)
    }

    /// Reopens the file with a different IO backend. Used to swap
    /// startup-scan memory maps back to standard IO.
    pub fn switch_io(&mut self, io_type: IoType) -> Result<()> {
        self.io = IoBackend::open(&self.path, io_type)?;
        Ok(())
    }

    /// Reads one log record starting at `offset`.
    ///
    /// Returns `Ok(None)` at end-of-data — either the file physically ends
    /// or an all-zero header is found (pre-allocated tail). A record whose
    /// payload extends past the end of the file yields an
    /// [`io::ErrorKind::UnexpectedEof`] error, and a CRC mismatch yields
    /// [`DataFileError::InvalidCrc`]; startup scanners treat both as a torn
    /// trailing write.
    ///
    /// On success returns the record and the total bytes it occupies on
    /// disk, so callers can advance to the next record.
    pub fn read_log_record(&self, offset: i64) -> Result<Option<(LogRecord, i64)>> {
        let file_size = self.io.size()? as i64;
        if offset >= file_size {
            return Ok(None);
        }

        // Read at most a full header, clamped to what the file still holds.
        let header_len = (MAX_HEADER_SIZE as i64).min(file_size - offset) as usize;
        let mut header_buf = vec![0u8; header_len];
        let n = self.io.read(&mut header_buf, offset as u64)?;
        header_buf.truncate(n);

        let Some((header, header_size)) = decode_header(&header_buf) else {
            return Ok(None);
        };
        if header.is_end_marker() {
            return Ok(None);
        }
        let rec_type = RecordType::from_u8(header.rec_type)
            .ok_or(DataFileError::Corrupted("unknown record type"))?;

        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;
        let mut payload = vec![0u8; key_size + value_size];
        let n = self
            .io
            .read(&mut payload, (offset + header_size as i64) as u64)?;
        if n < payload.len() {
            return Err(DataFileError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "record payload extends past end of file",
            )));
        }

        let value = payload.split_off(key_size);
        let record = LogRecord {
            key: payload,
            value,
            rec_type,
        };
        if record_crc(&record, &header_buf[4..header_size]) != header.crc {
            return Err(DataFileError::InvalidCrc);
        }

        Ok(Some((record, (header_size + key_size + value_size) as i64)))
    }

    /// Appends raw bytes and advances the write offset.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.io.write(buf)?;
        self.write_off += n as i64;
        Ok(n)
    }

    /// Appends a hint record: the user key paired with the encoded position
    /// of its rewritten record.
    pub fn write_hint_record(&mut self, key: &[u8], pos: &Position) -> Result<()> {
        let record = LogRecord {
            key: key.to_vec(),
            value: record::encode_position(pos),
            rec_type: RecordType::Normal,
        };
        self.write(&record.encode())?;
        Ok(())
    }

    /// Flushes the file to stable storage.
    pub fn sync(&self) -> Result<()> {
        Ok(self.io.sync()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn record(key: &[u8], value: &[u8]) -> LogRecord {
        LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            rec_type: RecordType::Normal,
        }
    }

    #[test]
    fn filename_is_zero_padded() {
        let path = DataFile::data_file_path(Path::new("/tmp/kv"), 7);
        assert_eq!(path, Path::new("/tmp/kv/000000007.data"));
    }

    #[test]
    fn write_tracks_offset() {
        let dir = tempdir().unwrap();
        let mut df = DataFile::open(dir.path(), 0, IoType::Standard).unwrap();

        assert_eq!(df.write_off(), 0);
        let n = df.write(&record(b"k", b"v").encode()).unwrap();
        assert_eq!(df.write_off(), n as i64);
        assert_eq!(df.size().unwrap(), n as u64);
    }

    #[test]
    fn sequential_records_read_back() {
        let dir = tempdir().unwrap();
        let mut df = DataFile::open(dir.path(), 1, IoType::Standard).unwrap();

        let records = [
            record(b"alpha", b"1"),
            record(b"beta", b"second value"),
            record(b"gamma", b""),
        ];
        for r in &records {
            df.write(&r.encode()).unwrap();
        }

        let mut offset = 0;
        for expected in &records {
            let (got, size) = df.read_log_record(offset).unwrap().unwrap();
            assert_eq!(&got, expected);
            offset += size;
        }
        assert!(df.read_log_record(offset).unwrap().is_none());
    }

    #[test]
    fn tombstone_type_survives_roundtrip() {
        let dir = tempdir().unwrap();
        let mut df = DataFile::open(dir.path(), 2, IoType::Standard).unwrap();

        let mut rec = record(b"doomed", b"");
        rec.rec_type = RecordType::Tombstone;
        df.write(&rec.encode()).unwrap();

        let (got, _) = df.read_log_record(0).unwrap().unwrap();
        assert_eq!(got.rec_type, RecordType::Tombstone);
    }

    #[test]
    fn read_empty_file_is_none() {
        let dir = tempdir().unwrap();
        let df = DataFile::open(dir.path(), 3, IoType::Standard).unwrap();
        assert!(df.read_log_record(0).unwrap().is_none());
    }

    #[test]
    fn zero_filled_tail_ends_scan() {
        let dir = tempdir().unwrap();
        let mut df = DataFile::open(dir.path(), 4, IoType::Standard).unwrap();

        let size = df.write(&record(b"k", b"v").encode()).unwrap();
        df.write(&[0u8; 64]).unwrap();

        assert!(df.read_log_record(0).unwrap().is_some());
        assert!(df.read_log_record(size as i64).unwrap().is_none());
    }

    #[test]
    fn flipped_byte_fails_crc() {
        let dir = tempdir().unwrap();
        let path = DataFile::data_file_path(dir.path(), 5);
        {
            let mut df = DataFile::open(dir.path(), 5, IoType::Standard).unwrap();
            df.write(&record(b"key", b"value").encode()).unwrap();
        }

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let df = DataFile::open(dir.path(), 5, IoType::Standard).unwrap();
        assert!(matches!(
            df.read_log_record(0),
            Err(DataFileError::InvalidCrc)
        ));
    }

    #[test]
    fn truncated_payload_is_unexpected_eof() {
        let dir = tempdir().unwrap();
        let path = DataFile::data_file_path(dir.path(), 6);
        {
            let mut df = DataFile::open(dir.path(), 6, IoType::Standard).unwrap();
            df.write(&record(b"key", b"a longer value that we cut short").encode())
                .unwrap();
        }

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();

        let df = DataFile::open(dir.path(), 6, IoType::Standard).unwrap();
        match df.read_log_record(0) {
            Err(DataFileError::Io(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof)
            }
            other => panic!("expected UnexpectedEof, got {other:?}"),
        }
    }

    #[test]
    fn hint_record_roundtrips_position() {
        let dir = tempdir().unwrap();
        let mut hint = DataFile::hint_file(dir.path()).unwrap();

        let pos = Position {
            file_id: 9,
            offset: 4096,
            size: 123,
        };
        hint.write_hint_record(b"user-key", &pos).unwrap();

        let (rec, _) = hint.read_log_record(0).unwrap().unwrap();
        assert_eq!(rec.key, b"user-key");
        assert_eq!(record::decode_position(&rec.value), Some(pos));
    }

    #[test]
    fn mmap_backend_reads_same_records() {
        let dir = tempdir().unwrap();
        {
            let mut df = DataFile::open(dir.path(), 7, IoType::Standard).unwrap();
            df.write(&record(b"a", b"1").encode()).unwrap();
            df.write(&record(b"b", b"2").encode()).unwrap();
        }

        let df = DataFile::open(dir.path(), 7, IoType::Mmap).unwrap();
        let (first, size) = df.read_log_record(0).unwrap().unwrap();
        assert_eq!(first.key, b"a");
        let (second, _) = df.read_log_record(size).unwrap().unwrap();
        assert_eq!(second.key, b"b");
    }

    #[test]
    fn switch_io_keeps_content_readable() {
        let dir = tempdir().unwrap();
        {
            let mut df = DataFile::open(dir.path(), 8, IoType::Standard).unwrap();
            df.write(&record(b"k", b"v").encode()).unwrap();
        }

        let mut df = DataFile::open(dir.path(), 8, IoType::Mmap).unwrap();
        assert!(df.read_log_record(0).unwrap().is_some());
        df.switch_io(IoType::Standard).unwrap();
        let (rec, _) = df.read_log_record(0).unwrap().unwrap();
        assert_eq!(rec.value, b"v");
    }
}
