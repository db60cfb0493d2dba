//! Entry-level view of the index.
//!
//! Rows are keyed by the raw client key; values are text-encoded
//! [`Entry`] bytes. A key without a row reads back as
//! [`Entry::missing`] (hard-deleted).

use crate::engine::{EngineError, IndexEngine};
use crate::wal::FsyncPolicy;
use hrw_entry::{text, CodecError, Entry};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index engine: {0}")]
    Engine(#[from] EngineError),
    #[error("entry codec: {0}")]
    Codec(#[from] CodecError),
}

/// Shared handle to the local index. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct LocalIndex {
    engine: Arc<RwLock<IndexEngine>>,
}

impl LocalIndex {
    pub fn new(engine: IndexEngine) -> Self {
        Self {
            engine: Arc::new(RwLock::new(engine)),
        }
    }

    /// Open (or create) the index directory.
    pub fn open(dir: &Path, fsync: FsyncPolicy) -> Result<Self, IndexError> {
        Ok(Self::new(IndexEngine::open(dir, fsync)?))
    }

    /// Look up the entry for `key`.
    pub async fn get(&self, key: &[u8]) -> Result<Entry, IndexError> {
        let raw = self.engine.read().await.get(key);
        match raw {
            Some(bytes) => Ok(text::decode(&bytes)?),
            None => Ok(Entry::missing()),
        }
    }

    /// Persist `entry` for `key`. Hard-deleted entries are refused by the
    /// codec before the engine is touched.
    pub async fn put(&self, key: &[u8], entry: &Entry) -> Result<(), IndexError> {
        let bytes = text::encode(entry)?;
        self.engine.write().await.put(key, &bytes)?;
        Ok(())
    }

    /// Remove the row for `key` (the key becomes hard-deleted).
    pub async fn delete(&self, key: &[u8]) -> Result<(), IndexError> {
        self.engine.write().await.delete(key)?;
        Ok(())
    }

    /// Ordered snapshot of every indexed key.
    pub async fn keys(&self) -> Vec<Vec<u8>> {
        self.engine.read().await.keys()
    }

    /// Ordered snapshot of every row, decoded. Rows that fail to decode
    /// are returned as errors so callers can report them.
    pub async fn entries(&self) -> Vec<(Vec<u8>, Result<Entry, CodecError>)> {
        let rows = self.engine.read().await.scan();
        rows.into_iter()
            .map(|(k, v)| {
                let entry = text::decode(&v);
                (k, entry)
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.engine.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.engine.read().await.is_empty()
    }

    /// Drop every row.
    pub async fn clear(&self) -> Result<(), IndexError> {
        self.engine.write().await.clear()?;
        Ok(())
    }

    pub async fn sync(&self) -> Result<(), IndexError> {
        self.engine.write().await.sync()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrw_entry::Status;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> LocalIndex {
        LocalIndex::open(dir.path(), FsyncPolicy::None).unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_is_hard_deleted() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);
        let e = index.get(b"/nope").await.unwrap();
        assert_eq!(e, Entry::missing());
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        let e = Entry::placeholder(vec!["a:1".into(), "b:2".into()]);
        index.put(b"/k", &e).await.unwrap();
        assert_eq!(index.get(b"/k").await.unwrap(), e);

        index.delete(b"/k").await.unwrap();
        assert_eq!(index.get(b"/k").await.unwrap().status, Status::HardDeleted);
    }

    #[tokio::test]
    async fn test_put_hard_deleted_is_refused() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        let err = index.put(b"/k", &Entry::missing()).await.unwrap_err();
        assert!(matches!(err, IndexError::Codec(CodecError::HardDeleted)));
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn test_entries_and_clear() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        index
            .put(b"/b", &Entry::exists(vec!["a:1".into()], ""))
            .await
            .unwrap();
        index
            .put(b"/a", &Entry::exists(vec!["b:2".into()], ""))
            .await
            .unwrap();

        let rows = index.entries().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, b"/a");
        assert_eq!(rows[0].1.as_ref().unwrap().storages, vec!["b:2".to_string()]);

        index.clear().await.unwrap();
        assert_eq!(index.len().await, 0);
        assert!(index.keys().await.is_empty());
    }
}
