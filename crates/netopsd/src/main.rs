//! netopsd — the netops daemon.
//!
//! Assembles the control plane from its subsystems:
//! - Northbound gNMI server over the config and status repositories
//! - Aggregator recording actual device configs in the status repository
//! - Rollout watchers, rollout and device reconcilers, device subscribers
//! - Admin REST API over the object store (redb)
//!
//! # Usage
//!
//! ```text
//! netopsd standalone --config-repo-path /srv/config --status-repo-path /srv/status \
//!     --inventory /etc/netops/inventory.toml
//! netopsd northbound --config-repo-url https://git.example/net/config.git
//! ```

mod args;
mod daemon;
mod inventory;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::{AggregatorArgs, ControllerArgs, NorthboundArgs, RepoArgs};

const DEFAULT_LOG_FILTER: &str = "info,netopsd=debug,netops=debug";

#[derive(Parser)]
#[command(name = "netopsd", about = "GitOps network configuration daemon")]
struct Cli {
    /// Log as JSON lines.
    #[arg(long, env = "NETOPSD_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every subsystem in one process.
    Standalone {
        #[command(flatten)]
        repos: RepoArgs,
        #[command(flatten)]
        northbound: NorthboundArgs,
        #[command(flatten)]
        aggregator: AggregatorArgs,
        #[command(flatten)]
        controller: ControllerArgs,
    },
    /// Serve the northbound gNMI API only.
    Northbound {
        #[command(flatten)]
        repos: RepoArgs,
        #[command(flatten)]
        northbound: NorthboundArgs,
    },
    /// Run the status-repo aggregator only.
    Aggregator {
        #[command(flatten)]
        repos: RepoArgs,
        #[command(flatten)]
        aggregator: AggregatorArgs,
    },
    /// Run the rollout and device controllers with the admin API.
    Controller {
        #[command(flatten)]
        repos: RepoArgs,
        #[command(flatten)]
        controller: ControllerArgs,
    },
}

fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handles = match cli.command {
        Command::Standalone {
            repos,
            northbound,
            aggregator,
            controller,
        } => {
            info!("netops daemon starting in standalone mode");
            let (config_repo, mut handles) =
                daemon::start_northbound(&repos, &northbound, false, &shutdown_rx)?;
            handles.extend(daemon::start_aggregator(&repos, &aggregator, &shutdown_rx)?);
            handles.extend(
                daemon::start_controllers(config_repo, &repos, &controller, &shutdown_rx).await?,
            );
            handles
        }
        Command::Northbound { repos, northbound } => {
            info!("netops daemon starting in northbound mode");
            daemon::start_northbound(&repos, &northbound, true, &shutdown_rx)?.1
        }
        Command::Aggregator { repos, aggregator } => {
            info!("netops daemon starting in aggregator mode");
            daemon::start_aggregator(&repos, &aggregator, &shutdown_rx)?
        }
        Command::Controller { repos, controller } => {
            info!("netops daemon starting in controller mode");
            let (config_repo, sync) = daemon::open_config_with_sync(&repos, &shutdown_rx)?;
            let mut handles = vec![sync];
            handles.extend(
                daemon::start_controllers(config_repo, &repos, &controller, &shutdown_rx).await?,
            );
            handles
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        let _ = handle.await;
    }
    info!("netops daemon stopped");
    Ok(())
}
