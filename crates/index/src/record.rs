//! WAL record format.

use serde::{Deserialize, Serialize};

/// One mutation of the index, as written to the WAL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    /// Raw client key.
    pub key: Vec<u8>,
    /// Encoded entry (empty for removals).
    pub value: Vec<u8>,
    /// Whether this record removes the row.
    pub removed: bool,
    /// Wall-clock timestamp (millis since epoch).
    pub timestamp_ms: u64,
}

impl IndexRecord {
    /// A row write.
    pub fn put(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            removed: false,
            timestamp_ms: now_ms(),
        }
    }

    /// A row removal.
    pub fn removal(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            removed: true,
            timestamp_ms: now_ms(),
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
