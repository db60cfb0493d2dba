//! In-memory storage fleet implementing [`StorageClient`].
//!
//! Objects are kept by full URL, so sub-storage prefixes and key paths
//! behave exactly as they would on real nodes. Whole hosts can be taken
//! down; every call is logged for assertions.

use crate::storage_client::{ListingEntry, StorageClient, StorageError};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Storage call kinds, as recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Probe,
    Fetch,
    Store,
    Purge,
    List,
}

/// A fleet of storage nodes held in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, Bytes>>,
    down: Mutex<HashSet<String>>,
    log: Mutex<Vec<(Call, String)>>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Split `http://host/path` into `(host, /path)`.
fn split_url(url: &str) -> (&str, &str) {
    let rest = url.strip_prefix("http://").unwrap_or(url);
    match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an object directly, bypassing the call log.
    pub fn insert(&self, url: &str, body: impl Into<Bytes>) {
        guard(&self.objects).insert(url.to_string(), body.into());
    }

    pub fn get(&self, url: &str) -> Option<Bytes> {
        guard(&self.objects).get(url).cloned()
    }

    pub fn contains(&self, url: &str) -> bool {
        guard(&self.objects).contains_key(url)
    }

    /// Every stored URL, ordered.
    pub fn urls(&self) -> Vec<String> {
        guard(&self.objects).keys().cloned().collect()
    }

    /// Make every call addressed to `host` fail (probes answer `false`).
    pub fn take_down(&self, host: &str) {
        guard(&self.down).insert(host.to_string());
    }

    pub fn bring_up(&self, host: &str) {
        guard(&self.down).remove(host);
    }

    /// URLs of every logged call of kind `call`, in call order.
    pub fn calls(&self, call: Call) -> Vec<String> {
        guard(&self.log)
            .iter()
            .filter(|(c, _)| *c == call)
            .map(|(_, url)| url.clone())
            .collect()
    }

    pub fn clear_log(&self) {
        guard(&self.log).clear();
    }

    fn record(&self, call: Call, url: &str) {
        guard(&self.log).push((call, url.to_string()));
    }

    fn check_up(&self, url: &str) -> Result<(), StorageError> {
        let (host, _) = split_url(url);
        if guard(&self.down).contains(host) {
            return Err(StorageError::Request {
                url: url.to_string(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageClient for MemoryStorage {
    async fn probe(&self, url: &str, _timeout: Duration) -> bool {
        self.record(Call::Probe, url);
        self.check_up(url).is_ok() && self.contains(url)
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, StorageError> {
        self.record(Call::Fetch, url);
        self.check_up(url)?;
        self.get(url).ok_or_else(|| StorageError::Status {
            url: url.to_string(),
            status: 404,
        })
    }

    async fn store(&self, url: &str, body: Bytes) -> Result<(), StorageError> {
        self.record(Call::Store, url);
        self.check_up(url)?;
        guard(&self.objects).insert(url.to_string(), body);
        Ok(())
    }

    async fn purge(&self, url: &str) -> Result<(), StorageError> {
        self.record(Call::Purge, url);
        self.check_up(url)?;
        // Absent objects count as purged.
        guard(&self.objects).remove(url);
        Ok(())
    }

    async fn list(&self, url: &str) -> Result<Vec<ListingEntry>, StorageError> {
        self.record(Call::List, url);
        self.check_up(url)?;

        let objects = guard(&self.objects);
        let mut dirs = BTreeSet::new();
        let mut files = BTreeSet::new();
        for stored in objects.keys() {
            let Some(rest) = stored.strip_prefix(url) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => {
                    files.insert(rest.to_string());
                }
            }
        }

        let (_, path) = split_url(url);
        if dirs.is_empty() && files.is_empty() && path != "/" {
            return Err(StorageError::Status {
                url: url.to_string(),
                status: 404,
            });
        }

        Ok(dirs
            .into_iter()
            .map(ListingEntry::directory)
            .chain(files.into_iter().map(ListingEntry::file))
            .collect())
    }
}
