//! Merge: rewrite live records into a sibling directory, then swap the
//! compacted files in at the next open.
//!
//! The procedure never touches the live directory while running. All output
//! goes to `<data_dir>-merge`: compacted data files (written through a
//! scratch engine), a hint file mapping every live key to its new position,
//! and — last, once everything else is durable — a completion marker naming
//! the first file id that did not participate. The marker is the single
//! atomic commit point: at the next open its presence means "adopt", its
//! absence means "discard".

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use datafile::file::{MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME};
use datafile::{DataFile, IoType, LogRecord, RecordType};
use index::{IndexKind, BPTREE_INDEX_FILE_NAME};

use crate::batch::{encode_record_key, parse_record_key, NON_TXN_SEQ_NO};
use crate::db::{dir_size, Db, FILE_LOCK_NAME};
use crate::error::{Error, Result};
use crate::options::Options;

/// Suffix of the staging directory, placed next to the data directory.
const MERGE_DIR_SUFFIX: &str = "-merge";

/// Key of the single record inside the completion marker.
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// Clears the in-progress flag however `merge` exits.
struct MergeFlagGuard<'a>(&'a AtomicBool);

impl Drop for MergeFlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Db {
    /// Compacts every sealed data file into a sibling directory.
    ///
    /// No-op on an empty database. Fails with [`Error::MergeIsInProgress`]
    /// if a merge is already running, [`Error::MergeRatioUnreached`] until
    /// dead bytes reach `data_file_merge_ratio`, and
    /// [`Error::NoEnoughSpaceForMerge`] when the filesystem cannot hold a
    /// compacted copy alongside the originals.
    ///
    /// The engine's write lock is held only for the guards and the rotation
    /// of the active file; the rewrite itself runs against sealed,
    /// immutable files.
    pub fn merge(&self) -> Result<()> {
        let mut files = self.files.write();
        if files.active.is_none() {
            return Ok(());
        }
        if self.is_merging.swap(true, Ordering::SeqCst) {
            return Err(Error::MergeIsInProgress);
        }
        let _merging = MergeFlagGuard(&self.is_merging);

        let total_size = dir_size(&self.options.dir_path)?;
        let reclaimable = self.reclaim_size.load(Ordering::SeqCst).max(0) as u64;
        if total_size == 0
            || (reclaimable as f32) / (total_size as f32) < self.options.data_file_merge_ratio
        {
            return Err(Error::MergeRatioUnreached);
        }
        let live_size = total_size - reclaimable;
        if live_size >= fs2::available_space(&self.options.dir_path)? {
            return Err(Error::NoEnoughSpaceForMerge);
        }

        // Seal the current active file so it participates too, and record
        // the boundary: everything below the new active file id is merged.
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
        let non_merge_file_id = files
            .active
            .as_ref()
            .map(|f| f.file_id())
            .ok_or(Error::DataFileNotFound)?;
        let mut merge_file_ids: Vec<u32> = files
            .older
            .keys()
            .copied()
            .filter(|id| *id < non_merge_file_id)
            .collect();
        merge_file_ids.sort_unstable();
        drop(files);

        debug!(
            files = merge_file_ids.len(),
            boundary = non_merge_file_id,
            "merge started"
        );

        // Fresh staging directory, discarding residue from any earlier
        // attempt that never reached its marker.
        let merge_path = merge_path(&self.options.dir_path);
        if merge_path.exists() {
            fs::remove_dir_all(&merge_path)?;
        }
        fs::create_dir_all(&merge_path)?;

        // A scratch engine gives the rewrite the ordinary append path
        // (rotation included) without disturbing this one. Its own key
        // directory is never read, so the in-memory default does fine.
        let mut merge_options = Options {
            dir_path: merge_path.clone(),
            sync_writes: false,
            index_kind: IndexKind::BTree,
            ..self.options.clone()
        };
        merge_options.data_file_merge_ratio = 0.0;
        let merge_db = Db::open(merge_options)?;
        let mut hint_file = DataFile::hint_file(&merge_path)?;

        // Rewrite, oldest file first so later records keep winning.
        for &file_id in &merge_file_ids {
            // Sealed files are immutable, so a private handle sidesteps the
            // engine lock for the whole scan.
            let data_file = DataFile::open(&self.options.dir_path, file_id, IoType::Standard)?;
            let mut offset = 0i64;
            while let Some((record, size)) = data_file.read_log_record(offset)? {
                let (_, user_key) = parse_record_key(&record.key)?;
                // live iff the directory still points at exactly this record
                let live = self
                    .index
                    .get(&user_key)?
                    .map(|pos| pos.file_id == file_id && pos.offset == offset)
                    .unwrap_or(false);
                if live {
                    let rewritten = LogRecord {
                        key: encode_record_key(&user_key, NON_TXN_SEQ_NO),
                        value: record.value,
                        rec_type: RecordType::Normal,
                    };
                    let new_pos = merge_db.append_log_record_with_lock(&rewritten)?;
                    hint_file.write_hint_record(&user_key, &new_pos)?;
                }
                offset += size;
            }
        }

        hint_file.sync()?;
        merge_db.sync()?;
        merge_db.close()?;

        // The marker commits the merge. Everything before it is already
        // durable.
        let mut marker = DataFile::merge_finished_file(&merge_path)?;
        let record = LogRecord {
            key: MERGE_FINISHED_KEY.to_vec(),
            value: non_merge_file_id.to_string().into_bytes(),
            rec_type: RecordType::Normal,
        };
        marker.write(&record.encode())?;
        marker.sync()?;

        debug!(boundary = non_merge_file_id, "merge finished");
        Ok(())
    }
}

/// `<data_dir>-merge`, next to the data directory.
fn merge_path(dir: &Path) -> PathBuf {
    let mut name = dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(MERGE_DIR_SUFFIX);
    dir.with_file_name(name)
}

/// Adopts completed merge output, if any. Runs before anything else touches
/// the directory at open, and is idempotent: a crash partway through leaves
/// a state this function repairs on the next call.
///
/// Returns whether compacted files were swapped in.
pub(crate) fn load_merge_files(dir: &Path) -> Result<bool> {
    let merge_path = merge_path(dir);
    if !merge_path.is_dir() {
        return Ok(false);
    }
    let adopted = adopt_merge_output(dir, &merge_path);
    // adopted or discarded, the staging directory is done
    let _ = fs::remove_dir_all(&merge_path);
    adopted
}

fn adopt_merge_output(dir: &Path, merge_path: &Path) -> Result<bool> {
    let mut merge_finished = false;
    let mut names: Vec<std::ffi::OsString> = Vec::new();
    for entry in fs::read_dir(merge_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let text = name.to_string_lossy();
        // the scratch engine's bookkeeping is meaningless outside its dir
        if text == SEQ_NO_FILE_NAME || text == FILE_LOCK_NAME || text == BPTREE_INDEX_FILE_NAME {
            continue;
        }
        if text == MERGE_FINISHED_FILE_NAME {
            merge_finished = true;
        }
        names.push(name);
    }
    if !merge_finished {
        debug!("discarding unfinished merge output");
        return Ok(false);
    }

    let non_merge_file_id = read_non_merge_file_id(merge_path)?;

    // Drop every data file the merge superseded...
    for file_id in 0..non_merge_file_id {
        let path = DataFile::data_file_path(dir, file_id);
        if path.is_file() {
            fs::remove_file(path)?;
        }
    }
    // ...and move the compacted files (plus hint file and marker) in.
    for name in names {
        fs::rename(merge_path.join(&name), dir.join(&name))?;
    }

    debug!(boundary = non_merge_file_id, "merge output adopted");
    Ok(true)
}

/// Reads the boundary file id out of the completion marker in `dir`.
pub(crate) fn read_non_merge_file_id(dir: &Path) -> Result<u32> {
    let marker = DataFile::merge_finished_file(dir)?;
    let (record, _) = marker
        .read_log_record(0)?
        .ok_or(Error::DataDirectoryCorrupted)?;
    let text =
        std::str::from_utf8(&record.value).map_err(|_| Error::DataDirectoryCorrupted)?;
    text.parse().map_err(|_| Error::DataDirectoryCorrupted)
}
