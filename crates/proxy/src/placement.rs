//! Key placement: maps a key to its owning storage targets by
//! rendezvous (highest-random-weight) hashing.
//!
//! Each storage scores `md5(key ‖ storage)`; the `replicas` highest scores
//! win. Ties keep the configured storage order, so every process derives
//! the same targets from the same inputs. With more than one sub-storage
//! the target gets an `/svXX` suffix chosen from the tail of the score.

use hrw_common::Digest;

/// Score of `storage` for `key`.
pub fn score(key: &[u8], storage: &str) -> Digest {
    Digest::of_parts(&[key, storage.as_bytes()])
}

/// Target string for a winning storage. Pure formatting downstream of
/// scoring.
pub fn target(storage: &str, score: &Digest, substorages: usize) -> String {
    if substorages <= 1 {
        storage.to_string()
    } else {
        let sv = score.tail_u32() % substorages as u32;
        format!("{}/sv{:02X}", storage, sv)
    }
}

/// The `replicas` targets owning `key`, best first.
///
/// Returns fewer than `replicas` targets only if there are fewer storages;
/// configuration validation rules that out for a running node.
pub fn place(key: &[u8], storages: &[String], replicas: usize, substorages: usize) -> Vec<String> {
    let mut ranked: Vec<(Digest, &str)> = storages
        .iter()
        .map(|s| (score(key, s), s.as_str()))
        .collect();

    // Stable: equal scores keep their configured order.
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    ranked
        .into_iter()
        .take(replicas)
        .map(|(score, storage)| target(storage, &score, substorages))
        .collect()
}

/// Whether `recorded` already matches `desired`, element for element.
pub fn is_balanced(recorded: &[String], desired: &[String]) -> bool {
    recorded == desired
}

/// The storage list and replica settings placement runs against.
#[derive(Debug, Clone)]
pub struct Layout {
    storages: Vec<String>,
    replicas: usize,
    substorages: usize,
}

impl Layout {
    pub fn new(storages: Vec<String>, replicas: usize, substorages: usize) -> Self {
        Self {
            storages,
            replicas,
            substorages,
        }
    }

    /// Desired targets for `key`.
    pub fn place(&self, key: &[u8]) -> Vec<String> {
        place(key, &self.storages, self.replicas, self.substorages)
    }

    pub fn storages(&self) -> &[String] {
        &self.storages
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn substorages(&self) -> usize {
        self.substorages
    }
}
