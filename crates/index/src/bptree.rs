//! Persistent key directory: a disk-backed B-tree.
//!
//! Positions are stored under the user key using the same varint triple the
//! hint file uses. Because the directory survives restarts, an engine
//! configured with this variant can skip replaying the log to rebuild its
//! index at startup.
//!
//! With `sync` off, commits are made durable lazily and `close` issues one
//! final durable commit.

use std::path::Path;

use datafile::record::{decode_position, encode_position};
use datafile::Position;
use redb::{Database, Durability, ReadableTableMetadata, TableDefinition};

use crate::{IndexError, Result};

/// Filename of the persistent index inside the data directory.
pub const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("keydir");

pub struct BPlusTreeIndex {
    db: Database,
    sync: bool,
}

impl std::fmt::Debug for BPlusTreeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTreeIndex")
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl BPlusTreeIndex {
    /// Opens (or creates) the index file inside `dir`.
    pub fn open(dir: &Path, sync: bool) -> Result<Self> {
        let db = Database::create(dir.join(BPTREE_INDEX_FILE_NAME))?;
        // create the table up front so read transactions can always open it
        let wtx = db.begin_write()?;
        {
            wtx.open_table(TABLE)?;
        }
        wtx.commit()?;
        Ok(Self { db, sync })
    }

    fn begin_write(&self) -> Result<redb::WriteTransaction> {
        let mut wtx = self.db.begin_write()?;
        if !self.sync {
            wtx.set_durability(Durability::Eventual);
        }
        Ok(wtx)
    }

    pub fn put(&self, key: Vec<u8>, pos: Position) -> Result<Option<Position>> {
        let wtx = self.begin_write()?;
        let prev = {
            let mut table = wtx.open_table(TABLE)?;
            let encoded = encode_position(&pos);
            let result = match table.insert(key.as_slice(), encoded.as_slice())? {
                Some(guard) => {
                    Some(decode_position(guard.value()).ok_or(IndexError::Corrupted)?)
                }
                None => None,
            };
            result
        };
        wtx.commit()?;
        Ok(prev)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Position>> {
        let rtx = self.db.begin_read()?;
        let table = rtx.open_table(TABLE)?;
        match table.get(key)? {
            Some(guard) => Ok(Some(
                decode_position(guard.value()).ok_or(IndexError::Corrupted)?,
            )),
            None => Ok(None),
        }
    }

    pub fn delete(&self, key: &[u8]) -> Result<(Option<Position>, bool)> {
        let wtx = self.begin_write()?;
        let prev = {
            let mut table = wtx.open_table(TABLE)?;
            let result = match table.remove(key)? {
                Some(guard) => {
                    Some(decode_position(guard.value()).ok_or(IndexError::Corrupted)?)
                }
                None => None,
            };
            result
        };
        wtx.commit()?;
        let existed = prev.is_some();
        Ok((prev, existed))
    }

    pub fn len(&self) -> Result<usize> {
        let rtx = self.db.begin_read()?;
        let table = rtx.open_table(TABLE)?;
        Ok(table.len()? as usize)
    }

    /// Ascending snapshot of all entries.
    pub(crate) fn snapshot(&self) -> Result<Vec<(Vec<u8>, Position)>> {
        let rtx = self.db.begin_read()?;
        let table = rtx.open_table(TABLE)?;
        let mut items = Vec::with_capacity(table.len()? as usize);
        for entry in table.range::<&[u8]>(..)? {
            let (key, value) = entry?;
            let pos = decode_position(value.value()).ok_or(IndexError::Corrupted)?;
            items.push((key.value().to_vec(), pos));
        }
        Ok(items)
    }

    /// Makes every earlier commit durable. Dropping the index afterwards
    /// closes the file.
    pub fn close(&self) -> Result<()> {
        let mut wtx = self.db.begin_write()?;
        wtx.set_durability(Durability::Immediate);
        {
            wtx.open_table(TABLE)?;
        }
        wtx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pos(file_id: u32, offset: i64) -> Position {
        Position {
            file_id,
            offset,
            size: 33,
        }
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let dir = tempdir().unwrap();
        let ix = BPlusTreeIndex::open(dir.path(), false).unwrap();

        assert_eq!(ix.put(b"k".to_vec(), pos(1, 0)).unwrap(), None);
        assert_eq!(ix.put(b"k".to_vec(), pos(1, 50)).unwrap(), Some(pos(1, 0)));
        assert_eq!(ix.get(b"k").unwrap(), Some(pos(1, 50)));

        assert_eq!(ix.delete(b"k").unwrap(), (Some(pos(1, 50)), true));
        assert_eq!(ix.delete(b"k").unwrap(), (None, false));
        assert_eq!(ix.get(b"k").unwrap(), None);
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let ix = BPlusTreeIndex::open(dir.path(), false).unwrap();
            ix.put(b"persisted".to_vec(), pos(3, 128)).unwrap();
            ix.close().unwrap();
        }

        let ix = BPlusTreeIndex::open(dir.path(), false).unwrap();
        assert_eq!(ix.get(b"persisted").unwrap(), Some(pos(3, 128)));
        assert_eq!(ix.len().unwrap(), 1);
    }

    #[test]
    fn snapshot_is_sorted() {
        let dir = tempdir().unwrap();
        let ix = BPlusTreeIndex::open(dir.path(), false).unwrap();
        for key in [&b"b"[..], b"c", b"a"] {
            ix.put(key.to_vec(), pos(1, 0)).unwrap();
        }

        let keys: Vec<_> = ix
            .snapshot()
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn empty_index_has_no_entries() {
        let dir = tempdir().unwrap();
        let ix = BPlusTreeIndex::open(dir.path(), true).unwrap();
        assert_eq!(ix.len().unwrap(), 0);
        assert!(ix.snapshot().unwrap().is_empty());
    }
}
