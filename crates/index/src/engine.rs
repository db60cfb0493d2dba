//! Index engine: combines the index log + Memtable.
//!
//! All writes go through the log first (for durability), then into the
//! in-memory memtable (for ordered reads). Every row write appends a
//! frame, so the log is compacted down to the live rows once superseded
//! frames dominate it.

use crate::memtable::Memtable;
use crate::record::IndexRecord;
use crate::wal::{FsyncPolicy, Wal, WalError};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("index log error: {0}")]
    Wal(#[from] WalError),
    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// When the log is rewritten from the live rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compaction {
    /// Compact once the log holds more than this many frames per live row.
    pub ratio: u64,
    /// Never compact a log shorter than this.
    pub min_frames: u64,
}

impl Default for Compaction {
    fn default() -> Self {
        Self {
            ratio: 4,
            min_frames: 4096,
        }
    }
}

impl Compaction {
    fn due(&self, frames: u64, live: usize) -> bool {
        frames >= self.min_frames && frames > self.ratio.saturating_mul(live as u64)
    }
}

/// The raw ordered key-value engine. All operations are synchronous
/// (blocking I/O); the async boundary is [`crate::LocalIndex`].
#[derive(Debug)]
pub struct IndexEngine {
    memtable: Memtable,
    wal: Wal,
    compaction: Compaction,
}

impl IndexEngine {
    /// Open or create an index at the given directory.
    pub fn open(dir: &Path, fsync: FsyncPolicy) -> Result<Self, EngineError> {
        Self::open_with(dir, fsync, Compaction::default())
    }

    pub fn open_with(
        dir: &Path,
        fsync: FsyncPolicy,
        compaction: Compaction,
    ) -> Result<Self, EngineError> {
        std::fs::create_dir_all(dir)?;
        let wal_path = dir.join("index.wal");

        let (wal, records) = Wal::open(&wal_path, fsync)?;
        let mut memtable = Memtable::new();
        for record in records {
            memtable.apply(record);
        }

        tracing::info!(
            "index opened: {} keys recovered from {} frames at {:?}",
            memtable.len(),
            wal.frames(),
            wal_path
        );

        let mut engine = Self {
            memtable,
            wal,
            compaction,
        };
        engine.maybe_compact()?;
        Ok(engine)
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.memtable.get(key)
    }

    /// Write a row: log first, then memtable.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.wal
            .append(&IndexRecord::put(key.to_vec(), value.to_vec()))?;
        self.memtable.put(key.to_vec(), value.to_vec());
        self.maybe_compact()
    }

    /// Remove a row. Removing an absent key still logs the removal.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), EngineError> {
        self.wal.append(&IndexRecord::removal(key.to_vec()))?;
        self.memtable.remove(key);
        self.maybe_compact()
    }

    /// Ordered snapshot of every row.
    pub fn scan(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.memtable.scan()
    }

    /// Ordered snapshot of every key.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.memtable.keys()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.memtable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memtable.is_empty()
    }

    /// Frames in the log, including superseded ones.
    pub fn log_frames(&self) -> u64 {
        self.wal.frames()
    }

    /// Drop every row, durably.
    pub fn clear(&mut self) -> Result<(), EngineError> {
        self.wal.rewrite(std::iter::empty())?;
        self.memtable.clear();
        Ok(())
    }

    /// Rewrite the log as one frame per live row.
    pub fn compact(&mut self) -> Result<(), EngineError> {
        let rows = self
            .memtable
            .scan()
            .into_iter()
            .map(|(key, value)| IndexRecord::put(key, value));
        self.wal.rewrite(rows)?;
        Ok(())
    }

    fn maybe_compact(&mut self) -> Result<(), EngineError> {
        if self.compaction.due(self.wal.frames(), self.memtable.len()) {
            self.compact()?;
        }
        Ok(())
    }

    /// Sync the log to disk (for batch fsync mode).
    pub fn sync(&mut self) -> Result<(), EngineError> {
        self.wal.sync()?;
        Ok(())
    }
}
