//! Coordinator: runs client PUT/GET/HEAD/DELETE against the storage fleet.
//!
//! Every operation:
//! 1. Takes the key lock (a held key is an immediate `Conflict`)
//! 2. Reads or writes the key's entry in the local index
//! 3. Fans out storage calls to the key's replicas
//! 4. Moves the entry to its next deletion state only once every replica
//!    call has succeeded

use crate::lock_table::{KeyLocks, LockError};
use crate::placement::{self, Layout};
use crate::storage_client::{StorageClient, StorageError};
use bytes::Bytes;
use hrw_common::{key_url, Digest};
use hrw_entry::{CodecError, Entry, Status};
use hrw_index::local::IndexError;
use hrw_index::LocalIndex;
use rand::seq::SliceRandom;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("key is locked by another operation")]
    Conflict,
    #[error("key not found")]
    NotFound,
    #[error("no recorded replica is reachable")]
    Unavailable,
    #[error("replica call to {url} failed: {source}")]
    Replica {
        url: String,
        #[source]
        source: StorageError,
    },
    #[error("index error: {0}")]
    Index(#[from] hrw_index::engine::EngineError),
    #[error("entry codec: {0}")]
    Codec(#[from] CodecError),
    #[error("reading request body failed: {0}")]
    Body(String),
}

impl From<LockError> for ProxyError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Conflict => ProxyError::Conflict,
        }
    }
}

impl From<IndexError> for ProxyError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::Engine(e) => ProxyError::Index(e),
            IndexError::Codec(e) => ProxyError::Codec(e),
        }
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub storages: Vec<String>,
    /// Lowercase hex MD5 of the stored body.
    pub hash: String,
}

/// Result of a successful read: where to redirect the client, plus the
/// diagnostics the router exposes as headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    /// URL of the live replica the client should follow.
    pub location: String,
    pub storages: Vec<String>,
    pub hash: String,
    /// Whether the recorded storages match the current placement.
    pub balanced: bool,
}

/// Request coordinator.
///
/// Generic over `S: StorageClient` for testability: real deployment uses
/// `HttpStorageClient`; unit tests use [`crate::memory::MemoryStorage`].
/// Cloning is cheap and shares the index, lock table and client.
pub struct Coordinator<S: StorageClient> {
    layout: Arc<Layout>,
    index: LocalIndex,
    locks: KeyLocks,
    storage: Arc<S>,
    read_probe_timeout: Duration,
}

impl<S: StorageClient> Clone for Coordinator<S> {
    fn clone(&self) -> Self {
        Self {
            layout: self.layout.clone(),
            index: self.index.clone(),
            locks: self.locks.clone(),
            storage: self.storage.clone(),
            read_probe_timeout: self.read_probe_timeout,
        }
    }
}

impl<S: StorageClient> std::fmt::Debug for Coordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("layout", &self.layout)
            .field("read_probe_timeout", &self.read_probe_timeout)
            .finish_non_exhaustive()
    }
}

impl<S: StorageClient> Coordinator<S> {
    pub fn new(
        layout: Layout,
        index: LocalIndex,
        locks: KeyLocks,
        storage: Arc<S>,
        read_probe_timeout: Duration,
    ) -> Self {
        Self {
            layout: Arc::new(layout),
            index,
            locks,
            storage,
            read_probe_timeout,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn index(&self) -> &LocalIndex {
        &self.index
    }

    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    // -----------------------------------------------------------------------
    // PUT
    // -----------------------------------------------------------------------

    /// Store `body` under `key` on every desired target.
    ///
    /// The entry is a `SoftDeleted` placeholder until all stores succeed;
    /// on any failure it stays that way and the first failure is returned.
    pub async fn write(&self, key: &[u8], body: Bytes) -> Result<WriteOutcome, ProxyError> {
        self.write_from(key, async move { Ok::<_, Infallible>(body) })
            .await
    }

    /// Like [`Coordinator::write`], but the body is still arriving. The key
    /// lock and the placeholder are taken before `body` is awaited, so a
    /// slow upload already masks the key from readers and other writers.
    pub async fn write_from<F, E>(&self, key: &[u8], body: F) -> Result<WriteOutcome, ProxyError>
    where
        F: Future<Output = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let _guard = self.locks.acquire(key)?;

        let desired = self.layout.place(key);
        self.index
            .put(key, &Entry::placeholder(desired.clone()))
            .await?;

        let body = body.await.map_err(|e| ProxyError::Body(e.to_string()))?;

        let calls = desired
            .iter()
            .map(|target| self.spawn_store(key_url(target, key), body.clone()))
            .collect();
        join_replica_calls("store", calls).await?;

        let hash = Digest::of(&body).to_hex();
        self.index
            .put(key, &Entry::exists(desired.clone(), hash.clone()))
            .await?;

        tracing::debug!("stored {:?} on {:?}", String::from_utf8_lossy(key), desired);
        Ok(WriteOutcome {
            storages: desired,
            hash,
        })
    }

    // -----------------------------------------------------------------------
    // GET / HEAD
    // -----------------------------------------------------------------------

    /// Find a live replica of `key`.
    ///
    /// Recorded storages are probed in random order; the first one that
    /// answers wins. Placement drift is reported, never repaired here.
    pub async fn read(&self, key: &[u8]) -> Result<ReadOutcome, ProxyError> {
        let _guard = self.locks.acquire(key)?;

        let entry = self.index.get(key).await?;
        if !entry.is_readable() {
            return Err(ProxyError::NotFound);
        }

        let balanced = placement::is_balanced(&entry.storages, &self.layout.place(key));

        let mut order: Vec<&String> = entry.storages.iter().collect();
        order.shuffle(&mut rand::thread_rng());

        for target in order {
            let url = key_url(target, key);
            if self.storage.probe(&url, self.read_probe_timeout).await {
                return Ok(ReadOutcome {
                    location: url,
                    storages: entry.storages.clone(),
                    hash: entry.hash.clone(),
                    balanced,
                });
            }
            tracing::debug!("replica {} did not answer probe", url);
        }

        tracing::warn!(
            "no live replica for {:?} among {:?}",
            String::from_utf8_lossy(key),
            entry.storages
        );
        Err(ProxyError::Unavailable)
    }

    // -----------------------------------------------------------------------
    // DELETE
    // -----------------------------------------------------------------------

    /// Remove `key` from every recorded replica, then from the index.
    ///
    /// The row is soft-deleted first so reads stop serving it; if a purge
    /// fails it stays soft-deleted and the delete can simply be retried.
    pub async fn delete(&self, key: &[u8]) -> Result<(), ProxyError> {
        let _guard = self.locks.acquire(key)?;

        let entry = self.index.get(key).await?;
        if entry.status == Status::HardDeleted {
            return Err(ProxyError::NotFound);
        }

        self.index.put(key, &entry.soft_deleted()).await?;

        let calls = entry
            .storages
            .iter()
            .map(|target| self.spawn_purge(key_url(target, key)))
            .collect();
        join_replica_calls("purge", calls).await?;

        self.index.delete(key).await?;
        tracing::debug!("deleted {:?}", String::from_utf8_lossy(key));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal: replica fan-out
    // -----------------------------------------------------------------------

    /// Spawned so that dropping the caller does not abort the store.
    pub(crate) fn spawn_store(&self, url: String, body: Bytes) -> ReplicaCall {
        let storage = self.storage.clone();
        let task_url = url.clone();
        let handle = tokio::spawn(async move { storage.store(&task_url, body).await });
        (url, handle)
    }

    pub(crate) fn spawn_purge(&self, url: String) -> ReplicaCall {
        let storage = self.storage.clone();
        let task_url = url.clone();
        let handle = tokio::spawn(async move { storage.purge(&task_url).await });
        (url, handle)
    }
}

pub(crate) type ReplicaCall = (String, JoinHandle<Result<(), StorageError>>);

/// Wait for every call; report the first failure once all have finished.
pub(crate) async fn join_replica_calls(op: &str, calls: Vec<ReplicaCall>) -> Result<(), ProxyError> {
    let mut first_failure = None;

    for (url, handle) in calls {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(StorageError::Request {
                url: url.clone(),
                reason: format!("task failed: {}", e),
            }),
        };
        if let Err(source) = result {
            tracing::warn!("{} to {} failed: {}", op, url, source);
            if first_failure.is_none() {
                first_failure = Some(ProxyError::Replica { url, source });
            }
        }
    }

    match first_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
