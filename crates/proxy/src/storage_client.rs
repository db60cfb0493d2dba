//! Abstraction over calls from the proxy to storage nodes.
//!
//! Concrete HTTP implementation lives in `hrw-net::client`; tests use
//! [`crate::memory::MemoryStorage`].
//!
//! All operations take a full object or directory URL as built by
//! [`hrw_common::key_url`]. The status codes each operation accepts are
//! fixed here so every implementation agrees on them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("{url} answered {status}")]
    Status { url: String, status: u16 },
    #[error("bad listing from {url}: {reason}")]
    Listing { url: String, reason: String },
}

/// One row of a storage node's JSON directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ListingEntry {
    pub const DIRECTORY: &'static str = "directory";
    pub const FILE: &'static str = "file";

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Self::DIRECTORY.to_string(),
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Self::FILE.to_string(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == Self::DIRECTORY
    }
}

/// A HEAD probe succeeds only on 200.
pub fn probe_accepts(status: u16) -> bool {
    status == 200
}

/// A GET succeeds only on 200.
pub fn fetch_accepts(status: u16) -> bool {
    status == 200
}

/// A PUT succeeds on 201 (created) or 204 (overwritten).
pub fn store_accepts(status: u16) -> bool {
    status == 201 || status == 204
}

/// A DELETE succeeds on 204, or 404 when the object is already gone.
pub fn purge_accepts(status: u16) -> bool {
    status == 204 || status == 404
}

/// Transport for storage node calls.
///
/// Same pattern as the index: a trait in the domain crate, with an HTTP
/// implementation in the `net` crate.
#[async_trait::async_trait]
pub trait StorageClient: Send + Sync + 'static {
    /// HEAD `url` within `timeout`. Any error or non-200 answer is `false`.
    async fn probe(&self, url: &str, timeout: Duration) -> bool;

    /// GET the object body at `url`.
    async fn fetch(&self, url: &str) -> Result<Bytes, StorageError>;

    /// PUT `body` at `url`.
    async fn store(&self, url: &str, body: Bytes) -> Result<(), StorageError>;

    /// DELETE the object at `url`.
    async fn purge(&self, url: &str) -> Result<(), StorageError>;

    /// GET the directory listing at `url` (which ends in `/`).
    async fn list(&self, url: &str) -> Result<Vec<ListingEntry>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_json_shape() {
        let raw = r#"[{"name":"2f","type":"directory"},{"name":"L2ZpbGUx","type":"file"}]"#;
        let rows: Vec<ListingEntry> = serde_json::from_str(raw).unwrap();
        assert_eq!(rows[0], ListingEntry::directory("2f"));
        assert!(rows[0].is_directory());
        assert!(!rows[1].is_directory());
        assert_eq!(
            serde_json::to_string(&rows[1]).unwrap(),
            r#"{"name":"L2ZpbGUx","type":"file"}"#
        );
    }

    #[test]
    fn test_status_contract() {
        assert!(probe_accepts(200));
        assert!(!probe_accepts(404));
        assert!(store_accepts(201) && store_accepts(204));
        assert!(!store_accepts(200));
        assert!(purge_accepts(204) && purge_accepts(404));
        assert!(!purge_accepts(500));
        assert!(fetch_accepts(200) && !fetch_accepts(301));
    }
}
