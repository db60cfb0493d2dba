//! hrw-node: entry point for the rendezvous placement proxy.
//!
//! Loads config, applies command-line overrides, opens the local index and
//! wires the coordinator to the HTTP storage transport. Then runs one
//! action: `serve` the client API, `build` the index from storage
//! listings, or `balance` every key onto its desired replicas.

use clap::{Parser, Subcommand};
use hrw_config::{ConfigError, NodeConfig};
use hrw_index::wal::FsyncPolicy;
use hrw_index::LocalIndex;
use hrw_net::HttpStorageClient;
use hrw_proxy::balance::{run_balance, BalanceConfig};
use hrw_proxy::lock_table::KeyLocks;
use hrw_proxy::rebuild::{run_rebuild, RebuildConfig};
use hrw_proxy::{Coordinator, Layout};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_CONFIG: &str = "listen: \"0.0.0.0:3000\"\n";

#[derive(Debug, Parser)]
#[command(name = "hrw-node", version, about = "Rendezvous-hash object placement proxy")]
struct Cli {
    #[command(subcommand)]
    action: Action,

    /// YAML config file. Flags below override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Client-facing listen port.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Local index directory.
    #[arg(long, global = true)]
    index: Option<PathBuf>,

    /// Replicas per key.
    #[arg(long, global = true)]
    replicas: Option<usize>,

    /// Virtual sub-storages per storage.
    #[arg(long, global = true)]
    substorages: Option<usize>,

    /// Comma-separated storage addresses (`host:port,host:port`).
    #[arg(long, global = true)]
    storages: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Action {
    /// Serve client GET/HEAD/PUT/DELETE requests.
    Serve,
    /// Rebuild the local index from storage listings.
    Build,
    /// Move every key onto its desired replicas.
    Balance,
}

/// Resolve the effective config: file (or built-in default), then flag
/// overrides, then validation.
fn resolve_config(cli: &Cli) -> Result<NodeConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => hrw_config::parse_str(&std::fs::read_to_string(path)?)?,
        None => hrw_config::parse_str(DEFAULT_CONFIG)?,
    };

    if let Some(port) = cli.port {
        config.listen = SocketAddr::new(config.listen.ip(), port);
    }
    if let Some(dir) = &cli.index {
        config.index.dir = dir.clone();
    }
    if let Some(replicas) = cli.replicas {
        config.placement.replicas = replicas;
    }
    if let Some(substorages) = cli.substorages {
        config.placement.substorages = substorages;
    }
    if let Some(list) = &cli.storages {
        config.storages = hrw_config::parse_storage_list(list);
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    hrw_metrics::init_tracing();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    tracing::info!(
        "{:?}: {} storages, replicas={}, substorages={}, index={}",
        cli.action,
        config.storages.len(),
        config.placement.replicas,
        config.placement.substorages,
        config.index.dir.display()
    );

    // Open local index
    let index = LocalIndex::open(
        &config.index.dir,
        FsyncPolicy::from_str_config(&config.index.fsync),
    )?;

    let layout = Layout::new(
        config.storages.clone(),
        config.placement.replicas,
        config.placement.substorages,
    );
    let coord = Coordinator::new(
        layout,
        index,
        KeyLocks::new(),
        Arc::new(HttpStorageClient::new()?),
        Duration::from_millis(config.read.probe_timeout_ms),
    );

    let index = coord.index().clone();
    match cli.action {
        Action::Serve => serve(&config, coord).await?,
        Action::Build => {
            let report = run_rebuild(
                &coord,
                &RebuildConfig {
                    workers: config.rebuild.workers,
                    queue_capacity: config.rebuild.queue_capacity,
                },
            )
            .await?;
            tracing::info!("build finished: {:?}", report);
        }
        Action::Balance => {
            let report = run_balance(
                &coord,
                &BalanceConfig {
                    workers: config.balance.workers,
                    queue_capacity: config.balance.queue_capacity,
                    probe_timeout: Duration::from_millis(config.balance.probe_timeout_ms),
                },
            )
            .await;
            tracing::info!("balance finished: {:?}", report);
        }
    }

    index.sync().await?;
    Ok(())
}

async fn serve(
    config: &NodeConfig,
    coord: Coordinator<HttpStorageClient>,
) -> Result<(), BoxError> {
    // Spawn metrics HTTP server if configured
    if let Some(metrics_port) = config.metrics_port {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
        tokio::spawn(async move {
            if let Err(e) = hrw_metrics::serve_metrics(metrics_addr).await {
                tracing::warn!("metrics server failed: {}", e);
            }
        });
    }

    // Serve with graceful shutdown on Ctrl+C
    tokio::select! {
        result = hrw_net::serve(config.listen, coord) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("hrw-node").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let parsed = cli(&[
            "serve",
            "--port",
            "4000",
            "--storages",
            "a:1, b:2,c:3",
            "--replicas",
            "2",
            "--substorages",
            "1",
            "--index",
            "/tmp/idx",
        ]);
        assert_eq!(parsed.action, Action::Serve);
        let config = resolve_config(&parsed).unwrap();
        assert_eq!(config.listen.port(), 4000);
        assert_eq!(config.storages, vec!["a:1", "b:2", "c:3"]);
        assert_eq!(config.placement.replicas, 2);
        assert_eq!(config.placement.substorages, 1);
        assert_eq!(config.index.dir, PathBuf::from("/tmp/idx"));
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("node.yaml");
        std::fs::write(
            &path,
            "listen: \"127.0.0.1:3000\"\nstorages: [\"a:1\", \"b:2\"]\nplacement:\n  replicas: 2\n",
        )
        .unwrap();

        let parsed = cli(&["build", "--config", path.to_str().unwrap(), "--replicas", "1"]);
        let config = resolve_config(&parsed).unwrap();
        assert_eq!(parsed.action, Action::Build);
        assert_eq!(config.listen.port(), 3000);
        assert_eq!(config.storages.len(), 2);
        assert_eq!(config.placement.replicas, 1);
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let no_storages = cli(&["balance"]);
        assert!(resolve_config(&no_storages).is_err());

        let too_many = cli(&["serve", "--storages", "a:1", "--replicas", "2"]);
        assert!(matches!(
            resolve_config(&too_many),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(Cli::try_parse_from(["hrw-node", "compact"]).is_err());
    }
}
