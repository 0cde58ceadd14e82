//! Skiplist key directory: a lock-free ordered map.
//!
//! Same contract as the B-tree variant, but reads never block behind a
//! writer. `put` reads the previous value before inserting; the engine's
//! write lock serializes mutators, so the two steps cannot interleave with
//! another writer.

use crossbeam_skiplist::SkipMap;
use datafile::Position;

#[derive(Debug, Default)]
pub struct SkipListIndex {
    map: SkipMap<Vec<u8>, Position>,
}

impl SkipListIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: Vec<u8>, pos: Position) -> Option<Position> {
        let prev = self.map.get(&key).map(|entry| *entry.value());
        self.map.insert(key, pos);
        prev
    }

    pub fn get(&self, key: &[u8]) -> Option<Position> {
        self.map.get(key).map(|entry| *entry.value())
    }

    pub fn delete(&self, key: &[u8]) -> (Option<Position>, bool) {
        let prev = self.map.remove(key).map(|entry| *entry.value());
        let existed = prev.is_some();
        (prev, existed)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Ascending snapshot of all entries.
    pub(crate) fn snapshot(&self) -> Vec<(Vec<u8>, Position)> {
        self.map
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(offset: i64) -> Position {
        Position {
            file_id: 1,
            offset,
            size: 20,
        }
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let ix = SkipListIndex::new();
        assert_eq!(ix.put(b"k".to_vec(), pos(0)), None);
        assert_eq!(ix.put(b"k".to_vec(), pos(64)), Some(pos(0)));
        assert_eq!(ix.get(b"k"), Some(pos(64)));

        assert_eq!(ix.delete(b"k"), (Some(pos(64)), true));
        assert_eq!(ix.delete(b"k"), (None, false));
        assert_eq!(ix.get(b"k"), None);
    }

    #[test]
    fn snapshot_orders_binary_keys() {
        let ix = SkipListIndex::new();
        ix.put(vec![0xFF], pos(0));
        ix.put(vec![0x00], pos(1));
        ix.put(vec![0x7F, 0x01], pos(2));

        let keys: Vec<_> = ix.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![vec![0x00], vec![0x7F, 0x01], vec![0xFF]]);
    }

    #[test]
    fn len_counts_unique_keys() {
        let ix = SkipListIndex::new();
        ix.put(b"a".to_vec(), pos(0));
        ix.put(b"a".to_vec(), pos(1));
        ix.put(b"b".to_vec(), pos(2));
        assert_eq!(ix.len(), 2);
    }
}
