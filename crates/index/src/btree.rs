//! Ordered-tree key directory: a `BTreeMap` behind a reader-writer lock.
//!
//! The default variant. The lock makes the directory safe to share between
//! the engine's writer and its readers; the engine's own lock already
//! serializes writers, so contention here is reader-vs-writer only.

use datafile::Position;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, Position>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: Vec<u8>, pos: Position) -> Option<Position> {
        self.tree.write().insert(key, pos)
    }

    pub fn get(&self, key: &[u8]) -> Option<Position> {
        self.tree.read().get(key).copied()
    }

    pub fn delete(&self, key: &[u8]) -> (Option<Position>, bool) {
        let prev = self.tree.write().remove(key);
        let existed = prev.is_some();
        (prev, existed)
    }

    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    /// Ascending snapshot of all entries.
    pub(crate) fn snapshot(&self) -> Vec<(Vec<u8>, Position)> {
        self.tree
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(file_id: u32, offset: i64) -> Position {
        Position {
            file_id,
            offset,
            size: 10,
        }
    }

    #[test]
    fn put_returns_previous_position() {
        let ix = BTreeIndex::new();
        assert_eq!(ix.put(b"k".to_vec(), pos(1, 0)), None);
        assert_eq!(ix.put(b"k".to_vec(), pos(1, 40)), Some(pos(1, 0)));
        assert_eq!(ix.get(b"k"), Some(pos(1, 40)));
    }

    #[test]
    fn get_missing_is_none() {
        let ix = BTreeIndex::new();
        assert_eq!(ix.get(b"nope"), None);
    }

    #[test]
    fn delete_reports_existence() {
        let ix = BTreeIndex::new();
        ix.put(b"k".to_vec(), pos(2, 7));

        assert_eq!(ix.delete(b"k"), (Some(pos(2, 7)), true));
        assert_eq!(ix.delete(b"k"), (None, false));
        assert_eq!(ix.len(), 0);
    }

    #[test]
    fn snapshot_is_sorted() {
        let ix = BTreeIndex::new();
        for key in [&b"cherry"[..], b"apple", b"banana"] {
            ix.put(key.to_vec(), pos(1, 0));
        }
        let keys: Vec<_> = ix.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]);
    }
}
