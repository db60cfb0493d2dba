//! Chaos injection wrapper for [`StorageClient`].
//!
//! [`ChaosStorageClient`] wraps any `S: StorageClient` and injects
//! configurable failures: random errors, per-storage failures, and latency.
//! A failed call never reaches the inner client; a failed probe answers
//! `false`.

use crate::storage_client::{ListingEntry, StorageClient, StorageError};
use bytes::Bytes;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

/// Configuration for storage chaos injection.
#[derive(Debug, Clone)]
pub struct ChaosStorageConfig {
    /// Probability of returning an error \[0.0, 1.0\].
    pub failure_rate: f64,
    /// Fixed latency injected before forwarding.
    pub latency: Duration,
    /// Random additional latency in \[0, jitter\].
    pub jitter: Duration,
}

impl Default for ChaosStorageConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

/// A [`StorageClient`] wrapper that injects chaos (failures, latency,
/// per-storage blocks).
pub struct ChaosStorageClient<S: StorageClient> {
    inner: Arc<S>,
    config: Arc<RwLock<ChaosStorageConfig>>,
    /// `host:port` authorities explicitly marked as failed.
    failed_storages: Arc<RwLock<HashSet<String>>>,
}

impl<S: StorageClient> std::fmt::Debug for ChaosStorageClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosStorageClient").finish_non_exhaustive()
    }
}

/// The `host:port` part of a storage URL.
fn authority(url: &str) -> &str {
    let rest = url.strip_prefix("http://").unwrap_or(url);
    rest.split('/').next().unwrap_or(rest)
}

impl<S: StorageClient> ChaosStorageClient<S> {
    pub fn new(inner: S, config: ChaosStorageConfig) -> Self {
        Self::wrap(Arc::new(inner), config)
    }

    /// Wrap a client that is also used elsewhere.
    pub fn wrap(inner: Arc<S>, config: ChaosStorageConfig) -> Self {
        Self {
            inner,
            config: Arc::new(RwLock::new(config)),
            failed_storages: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Mark a storage as failed (until recovered).
    pub async fn fail_storage(&self, storage: &str) {
        self.failed_storages.write().await.insert(storage.to_string());
    }

    /// Remove a storage from the failed set.
    pub async fn recover_storage(&self, storage: &str) {
        self.failed_storages.write().await.remove(storage);
    }

    /// Dynamically update the random failure rate.
    pub async fn set_failure_rate(&self, rate: f64) {
        self.config.write().await.failure_rate = rate;
    }

    /// Apply chaos checks: returns Err if the request should fail.
    async fn maybe_fail(&self, url: &str) -> Result<(), StorageError> {
        // Check explicit storage failures
        {
            let failed = self.failed_storages.read().await;
            if failed.contains(authority(url)) {
                return Err(StorageError::Request {
                    url: url.to_string(),
                    reason: "chaos: storage marked as failed".into(),
                });
            }
        }

        // Read config
        let (delay, failure_rate) = {
            let config = self.config.read().await;
            let jitter_ms = if config.jitter.is_zero() {
                0
            } else {
                rand::thread_rng().gen_range(0..=config.jitter.as_millis() as u64)
            };
            let delay = config.latency + Duration::from_millis(jitter_ms);
            (delay, config.failure_rate)
        };

        // Inject latency
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        // Random failure
        if failure_rate > 0.0 && rand::thread_rng().gen_bool(failure_rate.min(1.0)) {
            return Err(StorageError::Request {
                url: url.to_string(),
                reason: "chaos: random failure".into(),
            });
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: StorageClient> StorageClient for ChaosStorageClient<S> {
    async fn probe(&self, url: &str, timeout: Duration) -> bool {
        if self.maybe_fail(url).await.is_err() {
            return false;
        }
        self.inner.probe(url, timeout).await
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, StorageError> {
        self.maybe_fail(url).await?;
        self.inner.fetch(url).await
    }

    async fn store(&self, url: &str, body: Bytes) -> Result<(), StorageError> {
        self.maybe_fail(url).await?;
        self.inner.store(url, body).await
    }

    async fn purge(&self, url: &str) -> Result<(), StorageError> {
        self.maybe_fail(url).await?;
        self.inner.purge(url).await
    }

    async fn list(&self, url: &str) -> Result<Vec<ListingEntry>, StorageError> {
        self.maybe_fail(url).await?;
        self.inner.list(url).await
    }
}

// ────────────────────────── Tests ──────────────────────────
