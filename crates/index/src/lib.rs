//! # index — the key directory
//!
//! Bitcask keeps every live key in memory, mapped to the position of its
//! newest record on disk. This crate provides that directory behind one
//! capability set with three variants:
//!
//! | variant     | backing                               | survives restart |
//! |-------------|---------------------------------------|------------------|
//! | `BTree`     | `BTreeMap` under a `RwLock`           | no               |
//! | `SkipList`  | lock-free `crossbeam_skiplist` map    | no               |
//! | `BPlusTree` | `redb` B-tree file in the data dir    | yes              |
//!
//! All three order keys lexicographically. The in-memory variants are
//! rebuilt from the log at startup; the persistent variant lets startup skip
//! that scan entirely.
//!
//! Iteration goes through [`IndexIterator`], an eager snapshot cursor —
//! taken under the engine's read lock it can never observe a half-applied
//! update, and it stays valid however long the caller holds it.

mod bptree;
mod btree;
mod iter;
mod skiplist;

pub use bptree::{BPlusTreeIndex, BPTREE_INDEX_FILE_NAME};
pub use btree::BTreeIndex;
pub use iter::IndexIterator;
pub use skiplist::SkipListIndex;

use datafile::Position;
use std::path::Path;
use thiserror::Error;

/// Which key directory implementation the engine should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// In-memory ordered tree.
    BTree,
    /// In-memory lock-free skiplist.
    SkipList,
    /// Disk-backed B-tree that survives restarts.
    BPlusTree,
}

/// Errors from the key directory. The in-memory variants never fail; the
/// persistent variant surfaces its storage backend's failures here.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index backend error: {0}")]
    Backend(#[from] redb::Error),

    #[error("corrupted position entry in persistent index")]
    Corrupted,
}

impl From<redb::DatabaseError> for IndexError {
    fn from(e: redb::DatabaseError) -> Self {
        IndexError::Backend(e.into())
    }
}

impl From<redb::TransactionError> for IndexError {
    fn from(e: redb::TransactionError) -> Self {
        IndexError::Backend(e.into())
    }
}

impl From<redb::TableError> for IndexError {
    fn from(e: redb::TableError) -> Self {
        IndexError::Backend(e.into())
    }
}

impl From<redb::StorageError> for IndexError {
    fn from(e: redb::StorageError) -> Self {
        IndexError::Backend(e.into())
    }
}

impl From<redb::CommitError> for IndexError {
    fn from(e: redb::CommitError) -> Self {
        IndexError::Backend(e.into())
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// The key directory. Closed set of implementations dispatched as an enum;
/// every variant offers the same capability set.
#[derive(Debug)]
pub enum Indexer {
    BTree(BTreeIndex),
    SkipList(SkipListIndex),
    BPlusTree(BPlusTreeIndex),
}

impl Indexer {
    /// Constructs the directory variant selected by `kind`. `dir` and `sync`
    /// only matter to the persistent variant, which stores its file under
    /// the data directory.
    pub fn open(kind: IndexKind, dir: &Path, sync: bool) -> Result<Self> {
        match kind {
            IndexKind::BTree => Ok(Indexer::BTree(BTreeIndex::new())),
            IndexKind::SkipList => Ok(Indexer::SkipList(SkipListIndex::new())),
            IndexKind::BPlusTree => Ok(Indexer::BPlusTree(BPlusTreeIndex::open(dir, sync)?)),
        }
    }

    /// Inserts or replaces `key`, returning the previous position if the key
    /// was already present.
    pub fn put(&self, key: Vec<u8>, pos: Position) -> Result<Option<Position>> {
        match self {
            Indexer::BTree(ix) => Ok(ix.put(key, pos)),
            Indexer::SkipList(ix) => Ok(ix.put(key, pos)),
            Indexer::BPlusTree(ix) => ix.put(key, pos),
        }
    }

    /// Looks up the position of `key`'s newest record.
    pub fn get(&self, key: &[u8]) -> Result<Option<Position>> {
        match self {
            Indexer::BTree(ix) => Ok(ix.get(key)),
            Indexer::SkipList(ix) => Ok(ix.get(key)),
            Indexer::BPlusTree(ix) => ix.get(key),
        }
    }

    /// Removes `key`, returning its previous position and whether it was
    /// present.
    pub fn delete(&self, key: &[u8]) -> Result<(Option<Position>, bool)> {
        match self {
            Indexer::BTree(ix) => Ok(ix.delete(key)),
            Indexer::SkipList(ix) => Ok(ix.delete(key)),
            Indexer::BPlusTree(ix) => ix.delete(key),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> Result<usize> {
        match self {
            Indexer::BTree(ix) => Ok(ix.len()),
            Indexer::SkipList(ix) => Ok(ix.len()),
            Indexer::BPlusTree(ix) => ix.len(),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Snapshot iterator over all entries, ascending or descending by key.
    pub fn iterator(&self, reverse: bool) -> Result<IndexIterator> {
        let items = match self {
            Indexer::BTree(ix) => ix.snapshot(),
            Indexer::SkipList(ix) => ix.snapshot(),
            Indexer::BPlusTree(ix) => ix.snapshot()?,
        };
        Ok(IndexIterator::new(items, reverse))
    }

    /// Releases the directory. The persistent variant flushes its backing
    /// file; the in-memory variants have nothing to do.
    pub fn close(&self) -> Result<()> {
        match self {
            Indexer::BTree(_) | Indexer::SkipList(_) => Ok(()),
            Indexer::BPlusTree(ix) => ix.close(),
        }
    }
}
