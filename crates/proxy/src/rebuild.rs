//! Rebuild job: reconstructs the local index from what the storage nodes
//! actually hold.
//!
//! The index is wiped, then every storage (or each of its `svXX`
//! sub-storages) is crawled two directory levels deep. Leaf directories go
//! onto a bounded queue; a worker pool lists them and merges every file
//! name found back into the index as a replica of its decoded key.

use crate::coordinator::{Coordinator, ProxyError};
use crate::lock_table::{KeyGuard, KeyLocks};
use crate::storage_client::{ListingEntry, StorageClient};
use crate::workers::WorkerPool;
use hrw_common::decode_key_name;
use hrw_entry::{Entry, Status};
use tokio::time::Duration;

const BACKOFF_START: Duration = Duration::from_millis(1);
const BACKOFF_MAX: Duration = Duration::from_millis(50);

/// Configuration for a rebuild.
#[derive(Debug, Clone)]
pub struct RebuildConfig {
    /// Leaf directories listed concurrently.
    pub workers: usize,
    /// Leaf directories buffered between the crawl and the workers.
    pub queue_capacity: usize,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            workers: 128,
            queue_capacity: 20_000,
        }
    }
}

/// Counts for one rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Storage roots crawled (sub-storages count individually).
    pub storages: usize,
    /// Leaf directories queued.
    pub directories: usize,
    /// Replicas merged into the index.
    pub merged: usize,
    /// File names that did not decode to a key.
    pub rejected: usize,
    /// Listings or index writes that failed.
    pub failures: usize,
}

impl RebuildReport {
    fn absorb(&mut self, other: RebuildReport) {
        self.storages += other.storages;
        self.directories += other.directories;
        self.merged += other.merged;
        self.rejected += other.rejected;
        self.failures += other.failures;
    }
}

/// A leaf directory to list: `dir_url` lives on storage target `target`.
#[derive(Debug, Clone)]
struct CrawlTask {
    target: String,
    dir_url: String,
}

/// A key bucket directory: exactly two hex characters.
fn is_bucket_dir(entry: &ListingEntry) -> bool {
    entry.is_directory()
        && entry.name.len() == 2
        && entry.name.bytes().all(|b| b.is_ascii_hexdigit())
}

/// A virtual sub-storage root: `sv` plus two hex characters.
fn is_substorage_dir(entry: &ListingEntry) -> bool {
    entry.is_directory()
        && entry.name.len() == 4
        && entry.name.starts_with("sv")
        && entry.name.bytes().skip(2).all(|b| b.is_ascii_hexdigit())
}

/// Wipe the index and rebuild it from the storage fleet.
///
/// Only a failure to clear the index aborts; every other failure is
/// counted in the report and skipped.
pub async fn run_rebuild<S: StorageClient>(
    coord: &Coordinator<S>,
    config: &RebuildConfig,
) -> Result<RebuildReport, ProxyError> {
    coord.index().clear().await?;
    tracing::info!(
        "rebuild: index cleared, crawling {} storages with {} workers",
        coord.layout().storages().len(),
        config.workers
    );

    let worker_coord = coord.clone();
    let pool: WorkerPool<CrawlTask, RebuildReport> = WorkerPool::spawn(
        config.workers,
        config.queue_capacity,
        move |task: CrawlTask| {
            let coord = worker_coord.clone();
            async move { scan_directory(&coord, task).await }
        },
        RebuildReport::absorb,
    );

    let mut report = RebuildReport::default();
    for storage in coord.layout().storages() {
        let roots = match storage_roots(coord, storage).await {
            Ok(roots) => roots,
            Err(e) => {
                tracing::warn!("rebuild: cannot list {}: {}", storage, e);
                report.failures += 1;
                continue;
            }
        };
        for root in roots {
            report.storages += 1;
            crawl(coord, &root, &pool, &mut report).await;
        }
    }

    for partial in pool.join().await {
        report.absorb(partial);
    }

    tracing::info!(
        "rebuild done: storages={} directories={} merged={} rejected={} failures={}",
        report.storages,
        report.directories,
        report.merged,
        report.rejected,
        report.failures
    );
    Ok(report)
}

/// The targets to crawl on `storage`: its `svXX` sub-storages if it has
/// any, otherwise the storage itself.
async fn storage_roots<S: StorageClient>(
    coord: &Coordinator<S>,
    storage: &str,
) -> Result<Vec<String>, ProxyError> {
    let url = format!("http://{}/", storage);
    let listing = match coord.storage().list(&url).await {
        Ok(listing) => listing,
        Err(source) => return Err(ProxyError::Replica { url, source }),
    };

    let subs: Vec<String> = listing
        .iter()
        .filter(|e| is_substorage_dir(e))
        .map(|e| format!("{}/{}", storage, e.name))
        .collect();

    if subs.is_empty() {
        Ok(vec![storage.to_string()])
    } else {
        Ok(subs)
    }
}

/// Walk `root` two bucket levels deep, queueing each leaf directory.
async fn crawl<S: StorageClient>(
    coord: &Coordinator<S>,
    root: &str,
    pool: &WorkerPool<CrawlTask, RebuildReport>,
    report: &mut RebuildReport,
) {
    let top = format!("http://{}/", root);
    let first = match coord.storage().list(&top).await {
        Ok(listing) => listing,
        Err(e) => {
            tracing::warn!("rebuild: listing {} failed: {}", top, e);
            report.failures += 1;
            return;
        }
    };

    for a in first.iter().filter(|e| is_bucket_dir(e)) {
        let mid = format!("{}{}/", top, a.name);
        let second = match coord.storage().list(&mid).await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!("rebuild: listing {} failed: {}", mid, e);
                report.failures += 1;
                continue;
            }
        };

        for b in second.iter().filter(|e| is_bucket_dir(e)) {
            let task = CrawlTask {
                target: root.to_string(),
                dir_url: format!("{}{}/", mid, b.name),
            };
            if !pool.submit(task).await {
                tracing::error!("rebuild workers exited early");
                return;
            }
            report.directories += 1;
        }
    }
}

/// Worker body: list one leaf directory and merge every file in it.
async fn scan_directory<S: StorageClient>(coord: &Coordinator<S>, task: CrawlTask) -> RebuildReport {
    let mut report = RebuildReport::default();

    let listing = match coord.storage().list(&task.dir_url).await {
        Ok(listing) => listing,
        Err(e) => {
            tracing::warn!("rebuild: listing {} failed: {}", task.dir_url, e);
            report.failures += 1;
            return report;
        }
    };

    for file in listing.iter().filter(|e| !e.is_directory()) {
        let key = match decode_key_name(&file.name) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!("rebuild: skipping {}{}: {}", task.dir_url, file.name, e);
                hrw_metrics::metrics().rebuild_names_rejected.inc();
                report.rejected += 1;
                continue;
            }
        };

        match merge_discovered(coord, &key, &task.target).await {
            Ok(()) => {
                hrw_metrics::metrics().rebuild_keys_merged.inc();
                report.merged += 1;
            }
            Err(e) => {
                tracing::warn!(
                    "rebuild: merging {:?} from {} failed: {}",
                    String::from_utf8_lossy(&key),
                    task.target,
                    e
                );
                report.failures += 1;
            }
        }
    }

    report
}

/// Record that `target` holds a replica of `key`.
///
/// Desired targets come first in placement order, followed by any other
/// holders in the order they were discovered.
pub async fn merge_discovered<S: StorageClient>(
    coord: &Coordinator<S>,
    key: &[u8],
    target: &str,
) -> Result<(), ProxyError> {
    let _guard = acquire_with_backoff(coord.locks(), key).await;

    let entry = coord.index().get(key).await?;
    let mut seen = match entry.status {
        Status::HardDeleted => Vec::new(),
        _ => entry.storages,
    };
    if !seen.iter().any(|s| s == target) {
        seen.push(target.to_string());
    }

    let desired = coord.layout().place(key);
    let merged = order_by_placement(seen, &desired);
    coord.index().put(key, &Entry::exists(merged, "")).await?;
    Ok(())
}

fn order_by_placement(seen: Vec<String>, desired: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = desired
        .iter()
        .filter(|d| seen.contains(d))
        .cloned()
        .collect();
    ordered.extend(seen.into_iter().filter(|s| !desired.contains(s)));
    ordered
}

/// Discovery workers contend only briefly for the same key, so spin with
/// a short doubling sleep until the lock is free.
async fn acquire_with_backoff(locks: &KeyLocks, key: &[u8]) -> KeyGuard {
    let mut delay = BACKOFF_START;
    loop {
        match locks.acquire(key) {
            Ok(guard) => return guard,
            Err(_) => {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(BACKOFF_MAX);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use crate::placement::Layout;
    use bytes::Bytes;
    use hrw_common::key_url;
    use hrw_index::wal::FsyncPolicy;
    use hrw_index::LocalIndex;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn fleet(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("node{}:80", i)).collect()
    }

    fn setup(n: usize, replicas: usize, substorages: usize) -> (Coordinator<MemoryStorage>, TempDir) {
        let dir = TempDir::new().unwrap();
        let index = LocalIndex::open(dir.path(), FsyncPolicy::None).unwrap();
        let coord = Coordinator::new(
            Layout::new(fleet(n), replicas, substorages),
            index,
            KeyLocks::new(),
            Arc::new(MemoryStorage::new()),
            Duration::from_millis(50),
        );
        (coord, dir)
    }

    fn config() -> RebuildConfig {
        RebuildConfig {
            workers: 4,
            queue_capacity: 4,
        }
    }

    fn listing(name: &str, kind: &str) -> ListingEntry {
        ListingEntry {
            name: name.to_string(),
            kind: kind.to_string(),
        }
    }

    #[test]
    fn test_directory_filters() {
        assert!(is_bucket_dir(&listing("2f", "directory")));
        assert!(is_bucket_dir(&listing("AF", "directory")));
        assert!(!is_bucket_dir(&listing("2f", "file")));
        assert!(!is_bucket_dir(&listing("2g", "directory")));
        assert!(!is_bucket_dir(&listing("abc", "directory")));

        assert!(is_substorage_dir(&listing("sv0A", "directory")));
        assert!(!is_substorage_dir(&listing("sv0A", "file")));
        assert!(!is_substorage_dir(&listing("sv1", "directory")));
        assert!(!is_substorage_dir(&listing("xx0A", "directory")));
    }

    #[test]
    fn test_order_by_placement() {
        let desired = vec!["b".to_string(), "a".to_string()];
        let seen = vec!["x".to_string(), "a".to_string(), "y".to_string(), "b".to_string()];
        assert_eq!(order_by_placement(seen, &desired), vec!["b", "a", "x", "y"]);
    }

    #[tokio::test]
    async fn test_rebuild_restores_written_keys() {
        let (coord, _dir) = setup(4, 2, 1);
        let mut keys = Vec::new();
        for i in 0..30 {
            let key = format!("/data/{}", i).into_bytes();
            coord.write(&key, Bytes::from_static(b"x")).await.unwrap();
            keys.push(key);
        }
        // A stale row with no data behind it.
        coord
            .index()
            .put(b"/ghost", &Entry::exists(fleet(2), ""))
            .await
            .unwrap();

        let report = run_rebuild(&coord, &config()).await.unwrap();
        assert_eq!(report.storages, 4);
        assert_eq!(report.merged, 60);
        assert_eq!(report.failures, 0);

        let rebuilt = coord.index().entries().await;
        let found: HashSet<Vec<u8>> = rebuilt.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(found, keys.iter().cloned().collect());

        for (key, entry) in rebuilt {
            let entry = entry.unwrap();
            assert_eq!(entry.status, Status::Exists);
            assert_eq!(entry.storages, coord.layout().place(&key));
        }
        assert!(coord.locks().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_substorages() {
        let (coord, _dir) = setup(3, 2, 4);
        for i in 0..20 {
            let key = format!("/sv/{}", i);
            coord.write(key.as_bytes(), Bytes::from_static(b"x")).await.unwrap();
        }

        let report = run_rebuild(&coord, &config()).await.unwrap();
        assert!(report.storages > 3, "sub-storages crawled separately");
        assert_eq!(report.merged, 40);

        for (key, entry) in coord.index().entries().await {
            let entry = entry.unwrap();
            assert_eq!(entry.storages, coord.layout().place(&key));
        }
    }

    #[tokio::test]
    async fn test_rebuild_keeps_extra_holders_after_desired() {
        let (coord, _dir) = setup(4, 2, 1);
        let desired = coord.layout().place(b"/k");
        let extra: Vec<String> = fleet(4).into_iter().filter(|s| !desired.contains(s)).collect();

        // Present on one desired storage and one stray one.
        coord.storage().insert(&key_url(&extra[0], b"/k"), "v");
        coord.storage().insert(&key_url(&desired[1], b"/k"), "v");

        run_rebuild(&coord, &config()).await.unwrap();
        let entry = coord.index().get(b"/k").await.unwrap();
        assert_eq!(entry.storages, vec![desired[1].clone(), extra[0].clone()]);
    }

    #[tokio::test]
    async fn test_rebuild_skips_bad_names_and_dirs() {
        let (coord, _dir) = setup(2, 1, 1);
        coord.write(b"/good", Bytes::from_static(b"x")).await.unwrap();
        coord.storage().insert("http://node1:80/ab/cd/%%%", "junk");
        coord.storage().insert("http://node1:80/zz/cd/L2E=", "wrong bucket");
        coord.storage().insert("http://node1:80/abc/cd/L2E=", "wrong bucket");

        let report = run_rebuild(&coord, &config()).await.unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.merged, 1);
        assert_eq!(coord.index().keys().await, vec![b"/good".to_vec()]);
    }

    #[tokio::test]
    async fn test_rebuild_survives_dead_storage() {
        let (coord, _dir) = setup(3, 1, 1);
        for i in 0..20 {
            let key = format!("/d/{}", i);
            coord.write(key.as_bytes(), Bytes::from_static(b"x")).await.unwrap();
        }
        coord.storage().take_down("node2:80");

        let report = run_rebuild(&coord, &config()).await.unwrap();
        assert_eq!(report.failures, 1);

        for (key, entry) in coord.index().entries().await {
            let entry = entry.unwrap();
            assert!(!entry.storages.contains(&"node2:80".to_string()));
            assert_eq!(entry.storages, coord.layout().place(&key));
        }
    }

    #[tokio::test]
    async fn test_merge_waits_for_lock() {
        let (coord, _dir) = setup(3, 2, 1);
        let guard = coord.locks().acquire(b"/k").unwrap();

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            guard.release();
        });

        merge_discovered(&coord, b"/k", "node1:80").await.unwrap();
        releaser.await.unwrap();

        let entry = coord.index().get(b"/k").await.unwrap();
        assert_eq!(entry.storages.len(), 1);
        assert_eq!(entry.status, Status::Exists);
    }

    #[tokio::test]
    async fn test_merge_is_duplicate_free() {
        let (coord, _dir) = setup(3, 2, 1);
        merge_discovered(&coord, b"/k", "node1:80").await.unwrap();
        merge_discovered(&coord, b"/k", "node1:80").await.unwrap();
        assert_eq!(
            coord.index().get(b"/k").await.unwrap().storages,
            vec!["node1:80".to_string()]
        );
    }
}
