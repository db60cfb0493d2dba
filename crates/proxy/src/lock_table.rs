//! Per-key mutual exclusion.
//!
//! A single mutex guards the whole table. Every client request, balance
//! step and rebuild merge passes through it, which makes it the
//! serialization point of the proxy; hold times are a set insert or
//! remove, short next to the storage round trips around them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("key is locked by another operation")]
    Conflict,
}

/// Table of keys with an operation in flight. Cloning shares the table.
#[derive(Debug, Clone, Default)]
pub struct KeyLocks {
    held: Arc<Mutex<HashSet<Vec<u8>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashSet<Vec<u8>>> {
        // A panic while holding the table cannot leave the set half-updated.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the lock for `key`, or fail immediately with `Conflict`.
    pub fn acquire(&self, key: &[u8]) -> Result<KeyGuard, LockError> {
        if !self.table().insert(key.to_vec()) {
            hrw_metrics::metrics().lock_conflicts.inc();
            return Err(LockError::Conflict);
        }
        Ok(KeyGuard {
            locks: self.clone(),
            key: key.to_vec(),
        })
    }

    /// Releasing an unheld key is a no-op.
    fn release(&self, key: &[u8]) {
        self.table().remove(key);
    }

    pub fn is_held(&self, key: &[u8]) -> bool {
        self.table().contains(key)
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

/// Proof of holding a key. The key is released when the guard is dropped
/// or [`KeyGuard::release`] is called, whichever comes first.
#[derive(Debug)]
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyGuard {
    locks: KeyLocks,
    key: Vec<u8>,
}

impl KeyGuard {
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Release the key now.
    pub fn release(self) {}
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_conflicts() {
        let locks = KeyLocks::new();
        let guard = locks.acquire(b"/k").unwrap();
        assert_eq!(locks.acquire(b"/k").unwrap_err(), LockError::Conflict);
        assert_eq!(guard.key(), b"/k");
        assert!(locks.is_held(b"/k"));
    }

    #[test]
    fn test_release_then_acquire() {
        let locks = KeyLocks::new();
        let guard = locks.acquire(b"/k").unwrap();
        guard.release();
        assert!(!locks.is_held(b"/k"));
        assert!(locks.acquire(b"/k").is_ok());
    }

    #[test]
    fn test_drop_releases() {
        let locks = KeyLocks::new();
        {
            let _guard = locks.acquire(b"/k").unwrap();
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[test]
    fn test_independent_keys() {
        let locks = KeyLocks::new();
        let _a = locks.acquire(b"/a").unwrap();
        let _b = locks.acquire(b"/b").unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_release_unheld_is_noop() {
        let locks = KeyLocks::new();
        locks.release(b"/never");
        assert!(locks.is_empty());
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let locks = KeyLocks::new();
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    // Keep the guard alive so losers cannot slip in after a release.
                    locks.acquire(b"/hot").ok().map(std::mem::forget).is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(locks.is_held(b"/hot"));
    }
}
