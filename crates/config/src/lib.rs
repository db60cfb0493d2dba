//! Configuration schema and loader for hrw nodes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Character that separates storage addresses in index rows and on the
/// command line. Storage addresses must never contain it.
pub const STORAGE_SEPARATOR: char = ',';

/// Largest sub-storage count whose suffix still fits in two hex digits.
pub const MAX_SUBSTORAGES: usize = 256;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Client-facing listen address.
    pub listen: SocketAddr,

    /// Storage node addresses (`host:port`), in placement order.
    #[serde(default)]
    pub storages: Vec<String>,

    /// Replica and sub-storage settings.
    #[serde(default)]
    pub placement: PlacementConfig,

    /// Local index settings.
    #[serde(default)]
    pub index: IndexConfig,

    /// Client read path settings.
    #[serde(default)]
    pub read: ReadConfig,

    /// Balance job settings.
    #[serde(default)]
    pub balance: BalanceConfig,

    /// Rebuild job settings.
    #[serde(default)]
    pub rebuild: RebuildConfig,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Replicas per key.
    #[serde(default = "default_replicas")]
    pub replicas: usize,

    /// Virtual sub-storages per physical storage (1 disables the suffix).
    #[serde(default = "default_substorages")]
    pub substorages: usize,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            substorages: default_substorages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory holding the index WAL.
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,

    /// Fsync policy: "always", "batch", "none".
    #[serde(default = "default_fsync")]
    pub fsync: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            fsync: default_fsync(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadConfig {
    /// Liveness probe timeout on client reads, in milliseconds.
    #[serde(default = "default_read_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_read_probe_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Concurrent keys in flight.
    #[serde(default = "default_balance_workers")]
    pub workers: usize,

    /// Capacity of the key queue between the index scan and the workers.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Liveness probe timeout while balancing, in milliseconds.
    #[serde(default = "default_balance_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            workers: default_balance_workers(),
            queue_capacity: default_queue_capacity(),
            probe_timeout_ms: default_balance_probe_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildConfig {
    /// Concurrent directory crawls.
    #[serde(default = "default_rebuild_workers")]
    pub workers: usize,

    /// Capacity of the crawl task queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            workers: default_rebuild_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

// --- Defaults ---

fn default_replicas() -> usize {
    3
}
fn default_substorages() -> usize {
    10
}
fn default_index_dir() -> PathBuf {
    PathBuf::from("index")
}
fn default_fsync() -> String {
    "batch".to_string()
}
fn default_read_probe_timeout_ms() -> u64 {
    1000
}
fn default_balance_probe_timeout_ms() -> u64 {
    60_000
}
fn default_balance_workers() -> usize {
    16
}
fn default_rebuild_workers() -> usize {
    128
}
fn default_queue_capacity() -> usize {
    20_000
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Split a comma-separated storage list, dropping surrounding whitespace
/// and empty items.
pub fn parse_storage_list(s: &str) -> Vec<String> {
    s.split(STORAGE_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl NodeConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storages.is_empty() {
            return Err(ConfigError::Invalid("storages must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for s in &self.storages {
            if s.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "storages must not contain empty addresses".into(),
                ));
            }
            if s.contains(STORAGE_SEPARATOR) {
                return Err(ConfigError::Invalid(format!(
                    "storage address {:?} contains the separator {:?}",
                    s, STORAGE_SEPARATOR
                )));
            }
            if !seen.insert(s.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "storage address {:?} is listed twice",
                    s
                )));
            }
        }
        if self.placement.replicas == 0 {
            return Err(ConfigError::Invalid(
                "placement.replicas must be > 0".into(),
            ));
        }
        if self.placement.replicas > self.storages.len() {
            return Err(ConfigError::Invalid(format!(
                "placement.replicas ({}) must be <= number of storages ({})",
                self.placement.replicas,
                self.storages.len()
            )));
        }
        if self.placement.substorages == 0 || self.placement.substorages > MAX_SUBSTORAGES {
            return Err(ConfigError::Invalid(format!(
                "placement.substorages ({}) must be in 1..={}",
                self.placement.substorages, MAX_SUBSTORAGES
            )));
        }
        if self.balance.workers == 0 || self.rebuild.workers == 0 {
            return Err(ConfigError::Invalid("job workers must be > 0".into()));
        }
        if self.balance.queue_capacity == 0 || self.rebuild.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "job queue_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Load a `NodeConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<NodeConfig, ConfigError> {
    let config: NodeConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}

/// Parse a `NodeConfig` from YAML without validating it, so callers can
/// apply overrides first.
pub fn parse_str(yaml: &str) -> Result<NodeConfig, ConfigError> {
    Ok(serde_yaml::from_str(yaml)?)
}
