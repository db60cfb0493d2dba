//! Balance job: moves every indexed key onto its current placement.
//!
//! One pass scans the index, feeds the keys through a bounded queue to a
//! fixed worker pool and returns once every worker has drained it. Per
//! key, under the key lock, data is copied from a live replica to the
//! desired targets it is missing from, the index is pointed at the desired
//! set, and replicas outside that set are purged.

use crate::coordinator::{join_replica_calls, Coordinator, ProxyError};
use crate::placement;
use crate::storage_client::StorageClient;
use crate::workers::WorkerPool;
use bytes::Bytes;
use hrw_common::key_url;
use hrw_entry::{Entry, Status};
use tokio::time::Duration;

/// Configuration for a balance pass.
#[derive(Debug, Clone)]
pub struct BalanceConfig {
    /// Keys processed concurrently.
    pub workers: usize,
    /// Keys buffered between the index scan and the workers.
    pub queue_capacity: usize,
    /// Liveness probe timeout for recorded replicas.
    pub probe_timeout: Duration,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            queue_capacity: 20_000,
            probe_timeout: Duration::from_secs(60),
        }
    }
}

/// What happened to a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Live replicas already match the placement.
    Balanced,
    /// Data was moved and the index rewritten.
    Rebalanced,
    /// The row disappeared between the scan and the lock.
    Vanished,
}

/// Counts per outcome for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceReport {
    pub scanned: usize,
    pub balanced: usize,
    pub rebalanced: usize,
    pub vanished: usize,
    pub failed: usize,
}

impl BalanceReport {
    fn record(&mut self, outcome: Result<KeyOutcome, ProxyError>) {
        let label = match outcome {
            Ok(KeyOutcome::Balanced) => {
                self.balanced += 1;
                "balanced"
            }
            Ok(KeyOutcome::Rebalanced) => {
                self.rebalanced += 1;
                "rebalanced"
            }
            Ok(KeyOutcome::Vanished) => {
                self.vanished += 1;
                "vanished"
            }
            Err(_) => {
                self.failed += 1;
                "failed"
            }
        };
        hrw_metrics::metrics()
            .balance_keys
            .with_label_values(&[label])
            .inc();
    }

    fn merge(&mut self, other: &BalanceReport) {
        self.scanned += other.scanned;
        self.balanced += other.balanced;
        self.rebalanced += other.rebalanced;
        self.vanished += other.vanished;
        self.failed += other.failed;
    }
}

/// Run one balance pass over the whole index.
pub async fn run_balance<S: StorageClient>(
    coord: &Coordinator<S>,
    config: &BalanceConfig,
) -> BalanceReport {
    let keys = coord.index().keys().await;
    tracing::info!(
        "balance: {} keys, {} workers",
        keys.len(),
        config.workers
    );

    let worker_coord = coord.clone();
    let timeout = config.probe_timeout;
    let pool: WorkerPool<Vec<u8>, BalanceReport> = WorkerPool::spawn(
        config.workers,
        config.queue_capacity,
        move |key: Vec<u8>| {
            let coord = worker_coord.clone();
            async move {
                let outcome = balance_key(&coord, &key, timeout).await;
                match &outcome {
                    Ok(o) => tracing::debug!("balance {:?}: {:?}", String::from_utf8_lossy(&key), o),
                    Err(e) => {
                        tracing::warn!("balance {:?} failed: {}", String::from_utf8_lossy(&key), e)
                    }
                }
                outcome
            }
        },
        BalanceReport::record,
    );

    let mut report = BalanceReport::default();
    for key in keys {
        if !pool.submit(key).await {
            tracing::error!("balance workers exited early");
            break;
        }
        report.scanned += 1;
    }

    for partial in pool.join().await {
        report.merge(&partial);
    }

    tracing::info!(
        "balance done: scanned={} balanced={} rebalanced={} vanished={} failed={}",
        report.scanned,
        report.balanced,
        report.rebalanced,
        report.vanished,
        report.failed
    );
    report
}

/// Balance a single key.
pub async fn balance_key<S: StorageClient>(
    coord: &Coordinator<S>,
    key: &[u8],
    probe_timeout: Duration,
) -> Result<KeyOutcome, ProxyError> {
    let _guard = coord.locks().acquire(key)?;

    let entry = coord.index().get(key).await?;
    if entry.status == Status::HardDeleted {
        return Ok(KeyOutcome::Vanished);
    }

    let desired = coord.layout().place(key);

    // Live subset, in recorded order.
    let probes = entry.storages.iter().map(|target| {
        let url = key_url(target, key);
        async move { coord.storage().probe(&url, probe_timeout).await }
    });
    let alive = futures::future::join_all(probes).await;
    let live: Vec<String> = entry
        .storages
        .iter()
        .zip(alive)
        .filter(|(_, up)| *up)
        .map(|(target, _)| target.clone())
        .collect();

    if live.is_empty() {
        return Err(ProxyError::Unavailable);
    }

    if placement::is_balanced(&live, &desired) {
        return Ok(KeyOutcome::Balanced);
    }

    let missing: Vec<&String> = desired.iter().filter(|t| !live.contains(t)).collect();
    if !missing.is_empty() {
        let body = fetch_first(coord, key, &live).await?;
        let calls = missing
            .iter()
            .map(|target| coord.spawn_store(key_url(target, key), body.clone()))
            .collect();
        join_replica_calls("store", calls).await?;
    }

    coord
        .index()
        .put(key, &Entry::exists(desired.clone(), ""))
        .await?;

    let stale = live
        .iter()
        .filter(|t| !desired.contains(t))
        .map(|target| coord.spawn_purge(key_url(target, key)))
        .collect();
    join_replica_calls("purge", stale).await?;

    Ok(KeyOutcome::Rebalanced)
}

/// Body of `key` from the first live replica that serves it.
async fn fetch_first<S: StorageClient>(
    coord: &Coordinator<S>,
    key: &[u8],
    live: &[String],
) -> Result<Bytes, ProxyError> {
    let mut last = None;
    for target in live {
        let url = key_url(target, key);
        match coord.storage().fetch(&url).await {
            Ok(body) => return Ok(body),
            Err(source) => {
                tracing::warn!("fetch from {} failed: {}", url, source);
                last = Some(ProxyError::Replica { url, source });
            }
        }
    }
    Err(last.unwrap_or(ProxyError::Unavailable))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
