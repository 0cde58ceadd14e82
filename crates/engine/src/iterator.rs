//! The engine iterator: an ordered cursor over live keys that resolves
//! values through the engine on demand.
//!
//! The key sequence is a snapshot taken from the key directory at
//! construction time; values are read from disk when asked for, so a very
//! long-lived iterator can observe `KeyNotFound` for keys deleted since the
//! snapshot — the usual contract for snapshot cursors over a live store.

use datafile::Position;
use index::IndexIterator;

use crate::db::Db;
use crate::error::Result;
use crate::options::IteratorOptions;

/// An ordered (optionally prefix-filtered, optionally descending) cursor
/// over the engine's live keys.
pub struct DbIterator<'a> {
    db: &'a Db,
    index_iter: IndexIterator,
    options: IteratorOptions,
}

impl Db {
    /// Creates an iterator positioned at the first matching key.
    pub fn iterator(&self, options: IteratorOptions) -> Result<DbIterator<'_>> {
        // snapshot under the read lock so it cannot observe a half-applied
        // record/directory update
        let _files = self.files.read();
        let index_iter = self.index.iterator(options.reverse)?;
        let mut iter = DbIterator {
            db: self,
            index_iter,
            options,
        };
        iter.skip_to_next();
        Ok(iter)
    }
}

impl DbIterator<'_> {
    /// Moves back to the first matching key.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_next();
    }

    /// Positions at the first matching key `>= key` (forward) or `<= key`
    /// (reverse).
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_next();
    }

    /// Advances to the next matching key.
    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_next();
    }

    /// True while the cursor points at a key.
    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// Current key. Panics if the cursor is exhausted.
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Position of the current record on disk.
    pub fn position(&self) -> Position {
        self.index_iter.value()
    }

    /// Reads the current value from disk.
    pub fn value(&self) -> Result<Vec<u8>> {
        let pos = self.index_iter.value();
        let files = self.db.files.read();
        self.db.value_at(&files, &pos)
    }

    /// Advances past keys that do not carry the configured prefix.
    fn skip_to_next(&mut self) {
        if self.options.prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() {
            if self.index_iter.key().starts_with(&self.options.prefix) {
                break;
            }
            self.index_iter.next();
        }
    }
}
