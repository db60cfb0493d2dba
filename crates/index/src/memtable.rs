//! Ordered in-memory table holding the current index rows.

use crate::record::IndexRecord;
use std::collections::BTreeMap;

/// In-memory ordered key-value map. Iteration is in raw key byte order.
#[derive(Debug, Default)]
pub struct Memtable {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            data: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.get(key).cloned()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.data.insert(key, value);
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.remove(key)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Ordered snapshot of every row.
    pub fn scan(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Ordered snapshot of every key.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.data.keys().cloned().collect()
    }

    /// Apply a replayed WAL record: the last record for a key wins.
    pub fn apply(&mut self, record: IndexRecord) {
        if record.removed {
            self.data.remove(&record.key);
        } else {
            self.data.insert(record.key, record.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memtable_put_get() {
        let mut mt = Memtable::new();
        mt.put(b"/k1".to_vec(), b"a:1".to_vec());
        assert_eq!(mt.get(b"/k1"), Some(b"a:1".to_vec()));
        assert_eq!(mt.get(b"/missing"), None);
        assert_eq!(mt.len(), 1);
    }

    #[test]
    fn test_memtable_overwrite() {
        let mut mt = Memtable::new();
        mt.put(b"/k1".to_vec(), b"a:1".to_vec());
        mt.put(b"/k1".to_vec(), b"b:2".to_vec());
        assert_eq!(mt.get(b"/k1"), Some(b"b:2".to_vec()));
        assert_eq!(mt.len(), 1);
    }

    #[test]
    fn test_memtable_scan_is_ordered() {
        let mut mt = Memtable::new();
        for k in ["/c", "/a", "/b"] {
            mt.put(k.as_bytes().to_vec(), b"x".to_vec());
        }
        let keys: Vec<Vec<u8>> = mt.scan().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"/a".to_vec(), b"/b".to_vec(), b"/c".to_vec()]);
        assert_eq!(mt.keys(), keys);
    }

    #[test]
    fn test_memtable_apply_removal() {
        let mut mt = Memtable::new();
        mt.apply(IndexRecord::put(b"/k1".to_vec(), b"a:1".to_vec()));
        mt.apply(IndexRecord::put(b"/k2".to_vec(), b"a:1".to_vec()));
        mt.apply(IndexRecord::removal(b"/k1".to_vec()));
        assert_eq!(mt.get(b"/k1"), None);
        assert_eq!(mt.len(), 1);
    }

    #[test]
    fn test_memtable_clear() {
        let mut mt = Memtable::new();
        mt.put(b"/k1".to_vec(), b"a:1".to_vec());
        mt.clear();
        assert!(mt.is_empty());
    }
}
