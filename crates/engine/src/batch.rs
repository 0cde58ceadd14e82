//! Atomic write batches.
//!
//! A batch stages mutations in memory and commits them as one transaction:
//! every staged record is appended with the batch's sequence number embedded
//! in its on-disk key, followed by a `TxnFinished` marker. Startup replay
//! buffers sequence-framed records and applies them only when their marker
//! is found, so a commit interrupted before the marker leaves nothing
//! visible.
//!
//! Non-transactional writes use sequence number zero; the framing is part of
//! the record key format either way, which is why the helpers for it live
//! here and are shared with the recovery scan.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use datafile::{varint, LogRecord, Position, RecordType};

use crate::db::Db;
use crate::error::{Error, Result};
use crate::options::WriteBatchOptions;

/// Sequence number of records outside any batch.
pub(crate) const NON_TXN_SEQ_NO: u64 = 0;

/// On-disk key of a transaction finish marker (sequence-framed like any
/// other record key).
const TXN_FINISH_KEY: &[u8] = b"txn-fin";

/// Prefixes `key` with the varint-encoded sequence number — the on-disk key
/// format.
pub(crate) fn encode_record_key(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(varint::MAX_VARINT64_LEN + key.len());
    varint::encode_u64(seq_no, &mut out);
    out.extend_from_slice(key);
    out
}

/// Splits an on-disk key into its sequence number and the user key.
pub(crate) fn parse_record_key(key: &[u8]) -> Result<(u64, Vec<u8>)> {
    let mut rest = key;
    let seq_no = varint::decode_u64(&mut rest).ok_or(Error::DataDirectoryCorrupted)?;
    Ok((seq_no, rest.to_vec()))
}

/// A set of mutations committed atomically.
///
/// Staged records are invisible to reads until [`commit`](Self::commit)
/// returns. A batch can be reused after committing.
pub struct WriteBatch<'a> {
    db: &'a Db,
    options: WriteBatchOptions,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl Db {
    /// Creates an empty write batch over this engine.
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> WriteBatch<'_> {
        WriteBatch {
            db: self,
            options,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl WriteBatch<'_> {
    /// Stages a put. Visible only after `commit`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let mut pending = self.pending.lock();
        if pending.len() >= self.options.max_batch_num {
            return Err(Error::ExceedMaxBatchNum);
        }
        pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: value.to_vec(),
                rec_type: RecordType::Normal,
            },
        );
        Ok(())
    }

    /// Stages a delete. Deleting a key that exists neither on disk nor in
    /// the batch just discards any staged put for it.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let mut pending = self.pending.lock();
        if self.db.index.get(key)?.is_none() {
            pending.remove(key);
            return Ok(());
        }
        if pending.len() >= self.options.max_batch_num {
            return Err(Error::ExceedMaxBatchNum);
        }
        pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: Vec::new(),
                rec_type: RecordType::Tombstone,
            },
        );
        Ok(())
    }

    /// Number of staged records.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Appends every staged record under a fresh sequence number, writes the
    /// finish marker, optionally fsyncs, then applies the batch to the key
    /// directory and clears the stage.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_num {
            return Err(Error::ExceedMaxBatchNum);
        }

        // the engine write lock serializes this commit against every other
        // mutation, so the sequence numbers land in append order
        let mut files = self.db.files.write();
        let seq_no = self.db.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions: HashMap<Vec<u8>, Position> = HashMap::with_capacity(pending.len());
        for (key, record) in pending.iter() {
            let framed = LogRecord {
                key: encode_record_key(key, seq_no),
                value: record.value.clone(),
                rec_type: record.rec_type,
            };
            let pos = self.db.append_log_record(&mut files, &framed)?;
            positions.insert(key.clone(), pos);
        }

        let finish = LogRecord {
            key: encode_record_key(TXN_FINISH_KEY, seq_no),
            value: Vec::new(),
            rec_type: RecordType::TxnFinished,
        };
        self.db.append_log_record(&mut files, &finish)?;

        if self.options.sync_writes {
            if let Some(active) = files.active.as_ref() {
                active.sync()?;
            }
        }

        // apply to the directory while still holding the write lock, so no
        // concurrent put/delete/commit can interleave its own index update
        // between our appends and their visibility
        for (key, record) in pending.iter() {
            let Some(pos) = positions.get(key).copied() else {
                continue;
            };
            match record.rec_type {
                RecordType::Normal => {
                    if let Some(old) = self.db.index.put(key.clone(), pos)? {
                        self.db
                            .reclaim_size
                            .fetch_add(i64::from(old.size), Ordering::SeqCst);
                    }
                }
                RecordType::Tombstone => {
                    let (old, _) = self.db.index.delete(key)?;
                    let mut dead = i64::from(pos.size);
                    if let Some(old) = old {
                        dead += i64::from(old.size);
                    }
                    self.db.reclaim_size.fetch_add(dead, Ordering::SeqCst);
                }
                RecordType::TxnFinished => {}
            }
        }
        drop(files);

        pending.clear();
        Ok(())
    }
}
