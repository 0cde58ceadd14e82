//! The engine itself: directory lock, active/older files, append path,
//! reads, startup recovery, statistics, backup.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use fs2::FileExt;
use parking_lot::RwLock;
use tracing::{debug, warn};

use datafile::file::{DATA_FILE_SUFFIX, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME};
use datafile::{DataFile, DataFileError, IoType, LogRecord, Position, RecordType};
use index::{IndexKind, Indexer, BPTREE_INDEX_FILE_NAME};

use crate::batch::{encode_record_key, parse_record_key, NON_TXN_SEQ_NO};
use crate::error::{Error, Result};
use crate::merge;
use crate::options::Options;

/// Advisory lockfile guarding the directory against concurrent opens.
pub(crate) const FILE_LOCK_NAME: &str = "flock";

/// Key of the single record inside the seq-no sidecar.
const SEQ_NO_KEY: &[u8] = b"seq.no";

/// The open engine. All methods take `&self`; wrap in an `Arc` to share
/// across threads. One writer at a time is enforced internally by the file
/// lock below — readers run concurrently.
pub struct Db {
    pub(crate) options: Options,
    /// Active + sealed data files, guarded by the engine's single
    /// reader-writer lock. Every mutation holds the write half.
    pub(crate) files: RwLock<FileSet>,
    /// The key directory. Internally synchronized for lone readers; every
    /// mutation updates it while still holding the `files` write lock, so
    /// directory order always matches append order.
    pub(crate) index: Indexer,
    /// Last assigned transaction sequence number. Monotone across restarts.
    pub(crate) seq_no: AtomicU64,
    /// Bytes known dead on disk (superseded or tombstoned, not yet merged).
    pub(crate) reclaim_size: AtomicI64,
    pub(crate) is_merging: AtomicBool,
    /// Held (flocked) for the lifetime of the engine.
    lock_file: File,
}

/// The mutable file state under the engine lock.
pub(crate) struct FileSet {
    /// The single writable file. `None` only before the first append in a
    /// fresh directory.
    pub(crate) active: Option<DataFile>,
    /// Sealed, read-only files by id.
    pub(crate) older: HashMap<u32, DataFile>,
    /// Bytes appended since the last fsync, for `bytes_per_sync`.
    pub(crate) bytes_since_sync: u64,
}

/// A point-in-time summary of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Number of live keys.
    pub key_num: usize,
    /// Number of data files, active included.
    pub data_file_num: usize,
    /// Bytes reclaimable by a merge.
    pub reclaimable_size: i64,
    /// Total bytes under the data directory.
    pub disk_size: u64,
}

impl Db {
    /// Opens (or creates) a database rooted at `options.dir_path`.
    ///
    /// Acquires the directory lock, adopts any completed merge output,
    /// rebuilds the key directory (from the hint file plus a forward scan of
    /// the log, unless the persistent index variant makes the scan
    /// unnecessary), and restores the sequence counter.
    pub fn open(options: Options) -> Result<Db> {
        check_options(&options)?;
        let dir = options.dir_path.clone();
        if !dir.is_dir() {
            fs::create_dir_all(&dir)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.join(FILE_LOCK_NAME))?;
        match lock_file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                return Err(Error::DatabaseIsUsing)
            }
            Err(e) => return Err(Error::Io(e)),
        }

        let merge_adopted = merge::load_merge_files(&dir)?;

        // The persistent directory variant can skip the log scan, but only
        // when it is demonstrably current: it existed at open, the previous
        // session closed cleanly (seq-no sidecar present), and no merge just
        // rewrote record positions underneath it.
        let seq_file_exists = dir.join(SEQ_NO_FILE_NAME).is_file();
        let index_file_exists = dir.join(BPTREE_INDEX_FILE_NAME).is_file();
        let persistent = options.index_kind == IndexKind::BPlusTree;
        let rebuild_persistent =
            persistent && (merge_adopted || !seq_file_exists || !index_file_exists);
        if rebuild_persistent && index_file_exists {
            fs::remove_file(dir.join(BPTREE_INDEX_FILE_NAME))?;
        }
        let skip_scan = persistent && !rebuild_persistent;

        let index = Indexer::open(options.index_kind, &dir, options.sync_writes)?;

        let db = Db {
            options,
            files: RwLock::new(FileSet {
                active: None,
                older: HashMap::new(),
                bytes_since_sync: 0,
            }),
            index,
            seq_no: AtomicU64::new(0),
            reclaim_size: AtomicI64::new(0),
            is_merging: AtomicBool::new(false),
            lock_file,
        };

        db.load_seq_no()?;
        let file_ids = db.load_data_files()?;

        if skip_scan {
            let mut files = db.files.write();
            if let Some(active) = files.active.as_mut() {
                let size = active.size()? as i64;
                active.set_write_off(size);
            }
        } else {
            db.load_index_from_hint_file()?;
            db.load_index_from_data_files(&file_ids)?;
        }

        if db.options.mmap_at_startup {
            db.reset_io_type()?;
        }

        debug!(
            data_files = file_ids.len(),
            keys = db.index.len()?,
            "database opened"
        );
        Ok(db)
    }

    /// Stores `value` under `key`. The key must be non-empty; the value may
    /// be empty (an empty value is distinct from a deleted key).
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let record = LogRecord {
            key: encode_record_key(key, NON_TXN_SEQ_NO),
            value: value.to_vec(),
            rec_type: RecordType::Normal,
        };
        // append and directory update are one critical section: dropping the
        // lock between them would let two writers race their index updates
        // against their append order
        let mut files = self.files.write();
        let pos = self.append_log_record(&mut files, &record)?;
        if let Some(old) = self.index.put(key.to_vec(), pos)? {
            self.reclaim_size
                .fetch_add(i64::from(old.size), Ordering::SeqCst);
        }
        Ok(())
    }

    /// Returns the newest value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let pos = self.index.get(key)?.ok_or(Error::KeyNotFound)?;
        let files = self.files.read();
        self.value_at(&files, &pos)
    }

    /// Removes `key`. Deleting an absent key is a no-op.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let mut files = self.files.write();
        if self.index.get(key)?.is_none() {
            return Ok(());
        }
        let record = LogRecord {
            key: encode_record_key(key, NON_TXN_SEQ_NO),
            value: Vec::new(),
            rec_type: RecordType::Tombstone,
        };
        let pos = self.append_log_record(&mut files, &record)?;
        // the tombstone itself is dead weight from the moment it lands
        self.reclaim_size
            .fetch_add(i64::from(pos.size), Ordering::SeqCst);
        let (old, _) = self.index.delete(key)?;
        if let Some(old) = old {
            self.reclaim_size
                .fetch_add(i64::from(old.size), Ordering::SeqCst);
        }
        Ok(())
    }

    /// All live keys in ascending order.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let _files = self.files.read();
        let mut iter = self.index.iterator(false)?;
        let mut keys = Vec::with_capacity(self.index.len()?);
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        Ok(keys)
    }

    /// Calls `f(key, value)` for every live entry in ascending key order,
    /// stopping early when `f` returns `false`.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let files = self.files.read();
        let mut iter = self.index.iterator(false)?;
        while iter.valid() {
            let value = self.value_at(&files, &iter.value())?;
            if !f(iter.key(), &value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Fsyncs the active data file.
    pub fn sync(&self) -> Result<()> {
        let files = self.files.write();
        if let Some(active) = files.active.as_ref() {
            active.sync()?;
        }
        Ok(())
    }

    /// A point-in-time summary of the engine.
    pub fn stat(&self) -> Result<Stat> {
        let files = self.files.read();
        let data_file_num = files.older.len() + usize::from(files.active.is_some());
        Ok(Stat {
            key_num: self.index.len()?,
            data_file_num,
            reclaimable_size: self.reclaim_size.load(Ordering::SeqCst),
            disk_size: dir_size(&self.options.dir_path)?,
        })
    }

    /// Copies the data directory (everything but the lockfile) into `dir`.
    /// Safe while the engine is open: the read lock pauses writers, and the
    /// files are append-only, so the copy sees a consistent prefix.
    pub fn backup(&self, dir: impl AsRef<Path>) -> Result<()> {
        let _files = self.files.read();
        copy_dir(&self.options.dir_path, dir.as_ref(), &[FILE_LOCK_NAME])?;
        Ok(())
    }

    /// Persists the sequence counter, flushes and releases every file, and
    /// drops the directory lock. The engine is unusable afterwards.
    pub fn close(&self) -> Result<()> {
        let mut files = self.files.write();
        if files.active.is_some() || !files.older.is_empty() {
            let seq_path = self.options.dir_path.join(SEQ_NO_FILE_NAME);
            if seq_path.is_file() {
                fs::remove_file(&seq_path)?;
            }
            let mut seq_file = DataFile::seq_no_file(&self.options.dir_path)?;
            let record = LogRecord {
                key: SEQ_NO_KEY.to_vec(),
                value: self
                    .seq_no
                    .load(Ordering::SeqCst)
                    .to_string()
                    .into_bytes(),
                rec_type: RecordType::Normal,
            };
            seq_file.write(&record.encode())?;
            seq_file.sync()?;

            if let Some(active) = files.active.as_ref() {
                active.sync()?;
            }
        }
        files.active = None;
        files.older.clear();
        self.index.close()?;
        self.lock_file.unlock()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Append path
    // ------------------------------------------------------------------

    pub(crate) fn append_log_record_with_lock(&self, record: &LogRecord) -> Result<Position> {
        let mut files = self.files.write();
        self.append_log_record(&mut files, record)
    }

    /// Appends one encoded record to the active file, rotating first if the
    /// record would push it past `data_file_size`. Caller holds the write
    /// lock (or is the only owner, during merge).
    pub(crate) fn append_log_record(
        &self,
        files: &mut FileSet,
        record: &LogRecord,
    ) -> Result<Position> {
        if files.active.is_none() {
            files.active = Some(DataFile::open(&self.options.dir_path, 0, IoType::Standard)?);
        }

        let enc = record.encode();
        let len = enc.len() as i64;

        let must_rotate = files
            .active
            .as_ref()
            .map(|a| a.write_off() + len > self.options.data_file_size as i64)
            .unwrap_or(false);
        if must_rotate {
            if let Some(active) = files.active.take() {
                active.sync()?;
                let next_id = active.file_id() + 1;
                files.older.insert(active.file_id(), active);
                files.active = Some(DataFile::open(
                    &self.options.dir_path,
                    next_id,
                    IoType::Standard,
                )?);
            }
            files.bytes_since_sync = 0;
        }

        let (file_id, offset) = {
            let active = files.active.as_mut().ok_or(Error::DataFileNotFound)?;
            let offset = active.write_off();
            active.write(&enc)?;
            (active.file_id(), offset)
        };

        files.bytes_since_sync += enc.len() as u64;
        let need_sync = self.options.sync_writes
            || (self.options.bytes_per_sync > 0
                && files.bytes_since_sync >= self.options.bytes_per_sync);
        if need_sync {
            if let Some(active) = files.active.as_ref() {
                active.sync()?;
            }
            files.bytes_since_sync = 0;
        }

        Ok(Position {
            file_id,
            offset,
            size: enc.len() as u32,
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Reads the value of the record at `pos`. Caller holds at least the
    /// read lock.
    pub(crate) fn value_at(&self, files: &FileSet, pos: &Position) -> Result<Vec<u8>> {
        let candidate = if files.active.as_ref().map(|f| f.file_id()) == Some(pos.file_id) {
            files.active.as_ref()
        } else {
            files.older.get(&pos.file_id)
        };
        let data_file = candidate.ok_or(Error::DataFileNotFound)?;

        let (record, _) = data_file
            .read_log_record(pos.offset)?
            .ok_or(Error::KeyNotFound)?;
        if record.rec_type == RecordType::Tombstone {
            return Err(Error::KeyNotFound);
        }
        Ok(record.value)
    }

    // ------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------

    /// Restores the sequence counter from the sidecar left by the previous
    /// clean close, then removes the sidecar (it goes stale with the first
    /// new commit; a scan recovers the counter if we crash).
    fn load_seq_no(&self) -> Result<()> {
        let path = self.options.dir_path.join(SEQ_NO_FILE_NAME);
        if !path.is_file() {
            return Ok(());
        }
        let file = DataFile::seq_no_file(&self.options.dir_path)?;
        if let Some((record, _)) = file.read_log_record(0)? {
            let text = std::str::from_utf8(&record.value)
                .map_err(|_| Error::DataDirectoryCorrupted)?;
            let seq: u64 = text.parse().map_err(|_| Error::DataDirectoryCorrupted)?;
            self.seq_no.store(seq, Ordering::SeqCst);
        }
        fs::remove_file(&path)?;
        Ok(())
    }

    /// Enumerates `*.data` files, opens them (the newest as active on
    /// standard IO, the rest sealed — memory-mapped when configured), and
    /// returns the sorted file ids.
    fn load_data_files(&self) -> Result<Vec<u32>> {
        let mut file_ids = Vec::new();
        for entry in fs::read_dir(&self.options.dir_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) {
                let id: u32 = stem.parse().map_err(|_| Error::DataDirectoryCorrupted)?;
                file_ids.push(id);
            }
        }
        file_ids.sort_unstable();

        let sealed_io = if self.options.mmap_at_startup {
            IoType::Mmap
        } else {
            IoType::Standard
        };

        let mut files = self.files.write();
        for (i, &file_id) in file_ids.iter().enumerate() {
            let last = i == file_ids.len() - 1;
            let io_type = if last { IoType::Standard } else { sealed_io };
            let data_file = DataFile::open(&self.options.dir_path, file_id, io_type)?;
            if last {
                files.active = Some(data_file);
            } else {
                files.older.insert(file_id, data_file);
            }
        }
        Ok(file_ids)
    }

    /// Preloads the key directory from the hint file, if a merge left one.
    fn load_index_from_hint_file(&self) -> Result<()> {
        let path = self.options.dir_path.join(datafile::file::HINT_FILE_NAME);
        if !path.is_file() {
            return Ok(());
        }
        let hint = DataFile::hint_file(&self.options.dir_path)?;
        let mut offset = 0i64;
        while let Some((record, size)) = hint.read_log_record(offset)? {
            let pos = datafile::record::decode_position(&record.value)
                .ok_or(Error::DataDirectoryCorrupted)?;
            self.index.put(record.key, pos)?;
            offset += size;
        }
        debug!(entries = self.index.len()?, "key directory preloaded from hint file");
        Ok(())
    }

    /// Replays data files forward, rebuilding the key directory and the
    /// sequence counter. Files already covered by the hint file are skipped.
    /// Records carrying a non-zero sequence number are buffered per
    /// transaction and applied only once its finish marker appears.
    fn load_index_from_data_files(&self, file_ids: &[u32]) -> Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }

        // Everything below this file id was compacted and is covered by the
        // hint file.
        let mut non_merge_file_id = 0u32;
        if self
            .options
            .dir_path
            .join(MERGE_FINISHED_FILE_NAME)
            .is_file()
        {
            non_merge_file_id = merge::read_non_merge_file_id(&self.options.dir_path)?;
        }

        let mut txn_buffer: HashMap<u64, Vec<(RecordType, Vec<u8>, Position)>> = HashMap::new();
        let mut max_seq = self.seq_no.load(Ordering::SeqCst);

        let mut files = self.files.write();
        let last_id = file_ids[file_ids.len() - 1];
        for &file_id in file_ids {
            if file_id < non_merge_file_id {
                continue;
            }
            let is_active = file_id == last_id;
            let candidate = if is_active {
                files.active.as_ref()
            } else {
                files.older.get(&file_id)
            };
            let data_file = candidate.ok_or(Error::DataFileNotFound)?;

            let mut offset = 0i64;
            loop {
                let (record, size) = match data_file.read_log_record(offset) {
                    Ok(Some(found)) => found,
                    Ok(None) => break,
                    Err(DataFileError::InvalidCrc) => {
                        warn!(file_id, offset, "torn write at log tail, ending file scan");
                        break;
                    }
                    Err(DataFileError::Io(e))
                        if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                    {
                        warn!(file_id, offset, "truncated record at log tail, ending file scan");
                        break;
                    }
                    Err(e) => return Err(e.into()),
                };

                let pos = Position {
                    file_id,
                    offset,
                    size: size as u32,
                };
                let (seq, user_key) = parse_record_key(&record.key)?;
                if seq == NON_TXN_SEQ_NO {
                    self.apply_to_index(user_key, record.rec_type, pos)?;
                } else if record.rec_type == RecordType::TxnFinished {
                    // the whole transaction is durable — apply it in order
                    if let Some(buffered) = txn_buffer.remove(&seq) {
                        for (rec_type, key, buffered_pos) in buffered {
                            self.apply_to_index(key, rec_type, buffered_pos)?;
                        }
                    }
                } else {
                    txn_buffer
                        .entry(seq)
                        .or_default()
                        .push((record.rec_type, user_key, pos));
                }

                if seq > max_seq {
                    max_seq = seq;
                }
                offset += size;
            }

            if is_active {
                if let Some(active) = files.active.as_mut() {
                    active.set_write_off(offset);
                    // Appends land at the physical end of the file, so any
                    // torn or zero-filled tail behind `offset` has to go —
                    // otherwise the next record's position would be wrong.
                    let size = active.size()? as i64;
                    if offset < size {
                        warn!(
                            file_id,
                            from = size,
                            to = offset,
                            "truncating active file to last valid record"
                        );
                        let path =
                            DataFile::data_file_path(&self.options.dir_path, file_id);
                        let file = OpenOptions::new().write(true).open(&path)?;
                        file.set_len(offset as u64)?;
                    }
                }
            }
        }

        self.seq_no.store(max_seq, Ordering::SeqCst);
        Ok(())
    }

    /// One replayed record's effect on the directory and the dead-byte
    /// counter.
    fn apply_to_index(&self, key: Vec<u8>, rec_type: RecordType, pos: Position) -> Result<()> {
        match rec_type {
            RecordType::Normal => {
                if let Some(old) = self.index.put(key, pos)? {
                    self.reclaim_size
                        .fetch_add(i64::from(old.size), Ordering::SeqCst);
                }
            }
            RecordType::Tombstone => {
                let (old, _) = self.index.delete(&key)?;
                let mut dead = i64::from(pos.size);
                if let Some(old) = old {
                    dead += i64::from(old.size);
                }
                self.reclaim_size.fetch_add(dead, Ordering::SeqCst);
            }
            RecordType::TxnFinished => {}
        }
        Ok(())
    }

    /// Swaps every sealed file's startup memory map for standard IO.
    fn reset_io_type(&self) -> Result<()> {
        let mut files = self.files.write();
        for data_file in files.older.values_mut() {
            data_file.switch_io(IoType::Standard)?;
        }
        Ok(())
    }
}

/// Best-effort close; errors here have nowhere to go, and everything that
/// matters for durability is already on disk or recoverable by scan.
impl Drop for Db {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("dir_path", &self.options.dir_path)
            .field("seq_no", &self.seq_no.load(Ordering::SeqCst))
            .field("reclaim_size", &self.reclaim_size.load(Ordering::SeqCst))
            .field("is_merging", &self.is_merging.load(Ordering::SeqCst))
            .finish()
    }
}

fn check_options(options: &Options) -> Result<()> {
    if options.dir_path.as_os_str().is_empty() {
        return Err(Error::InvalidOptions("database directory path is empty"));
    }
    if options.data_file_size == 0 {
        return Err(Error::InvalidOptions("data file size must be positive"));
    }
    if !(0.0..=1.0).contains(&options.data_file_merge_ratio) {
        return Err(Error::InvalidOptions(
            "merge ratio must lie between 0 and 1",
        ));
    }
    Ok(())
}

/// Total size in bytes of every file under `path`.
pub(crate) fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

/// Copies every file under `src` into `dst`, preserving names and skipping
/// anything in `exclude`.
fn copy_dir(src: &Path, dst: &Path, exclude: &[&str]) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|e| name.to_string_lossy() == *e) {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        if entry.metadata()?.is_dir() {
            copy_dir(&src_path, &dst_path, exclude)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}
