//! Command-line flags. Every `--some-flag` falls back to `NETOPSD_SOME_FLAG`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use netops_core::{DEFAULT_TRUNK, TlsConfig, clamp_sync_period};
use netops_git::{GitRepo, RepoOptions};
use netops_northbound::SetOptions;

#[derive(Args, Debug, Clone)]
pub struct RepoArgs {
    /// Worktree of the config repository.
    #[arg(long, env = "NETOPSD_CONFIG_REPO_PATH", default_value = "/var/lib/netops/config")]
    pub config_repo_path: PathBuf,

    /// Remote of the config repository; cloned when the worktree is missing.
    #[arg(long, env = "NETOPSD_CONFIG_REPO_URL")]
    pub config_repo_url: Option<String>,

    /// Worktree of the status repository.
    #[arg(long, env = "NETOPSD_STATUS_REPO_PATH", default_value = "/var/lib/netops/status")]
    pub status_repo_path: PathBuf,

    #[arg(long, env = "NETOPSD_STATUS_REPO_URL")]
    pub status_repo_url: Option<String>,

    /// `user:pass`, or a token used as the password for user `git`.
    #[arg(long, env = "NETOPSD_GIT_TOKEN", hide_env_values = true)]
    pub git_token: Option<String>,

    #[arg(long, env = "NETOPSD_TRUNK", default_value = DEFAULT_TRUNK)]
    pub trunk: String,

    /// Seconds between repository syncs (at least 10).
    #[arg(long, env = "NETOPSD_SYNC_PERIOD", default_value_t = 30)]
    pub sync_period: u64,
}

impl RepoArgs {
    pub fn open_config(&self) -> anyhow::Result<GitRepo> {
        self.open(&self.config_repo_path, self.config_repo_url.as_deref())
    }

    pub fn open_status(&self) -> anyhow::Result<GitRepo> {
        self.open(&self.status_repo_path, self.status_repo_url.as_deref())
    }

    pub fn sync_period(&self) -> Duration {
        clamp_sync_period(Duration::from_secs(self.sync_period))
    }

    fn open(&self, path: &Path, url: Option<&str>) -> anyhow::Result<GitRepo> {
        GitRepo::open(RepoOptions {
            path: path.to_path_buf(),
            url: url.map(str::to_string),
            clone_if_not_exists: url.is_some(),
            token: self.git_token.clone(),
            ..Default::default()
        })
        .with_context(|| format!("failed to open repository at {}", path.display()))
    }
}

#[derive(Args, Debug, Clone)]
pub struct NorthboundArgs {
    /// gRPC listen address.
    #[arg(long, env = "NETOPSD_GRPC_ADDR", default_value = "0.0.0.0:9339")]
    pub grpc_addr: SocketAddr,

    #[arg(long, env = "NETOPSD_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, env = "NETOPSD_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// CA for client certificates; enables mutual TLS.
    #[arg(long, env = "NETOPSD_TLS_CA")]
    pub tls_ca: Option<PathBuf>,

    /// Accept clients without a certificate when a CA is set.
    #[arg(long, env = "NETOPSD_TLS_INSECURE")]
    pub tls_insecure: bool,

    /// Commit each Set on its own `REV-<unix>` branch.
    #[arg(long, env = "NETOPSD_BRANCH_PER_COMMIT")]
    pub branch_per_commit: bool,

    /// Leave the config worktree as a Set left it.
    #[arg(long, env = "NETOPSD_PERSIST_GIT_STATE")]
    pub persist_git_state: bool,
}

impl NorthboundArgs {
    pub fn tls(&self) -> TlsConfig {
        TlsConfig {
            cert: self.tls_cert.clone(),
            key: self.tls_key.clone(),
            ca: self.tls_ca.clone(),
            insecure: self.tls_insecure,
        }
    }

    pub fn set_options(&self, trunk: &str) -> SetOptions {
        SetOptions {
            trunk: trunk.to_string(),
            branch_per_commit: self.branch_per_commit,
            persist_git_state: self.persist_git_state,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AggregatorArgs {
    /// Listen address of the `/commit` ingest endpoint.
    #[arg(long, env = "NETOPSD_AGGREGATOR_ADDR", default_value = "0.0.0.0:8080")]
    pub aggregator_addr: SocketAddr,

    /// Seconds between status-repo commits.
    #[arg(long, env = "NETOPSD_COMMIT_PERIOD", default_value_t = 5)]
    pub commit_period: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ControllerArgs {
    /// Directory for the object store.
    #[arg(long, env = "NETOPSD_DATA_DIR", default_value = "/var/lib/netops")]
    pub data_dir: PathBuf,

    /// Device inventory (TOML).
    #[arg(long, env = "NETOPSD_INVENTORY", default_value = "/etc/netops/inventory.toml")]
    pub inventory: PathBuf,

    /// Admin REST API listen address.
    #[arg(long, env = "NETOPSD_API_ADDR", default_value = "0.0.0.0:8443")]
    pub api_addr: SocketAddr,

    /// Base URL subscribers post actual configs to.
    #[arg(long, env = "NETOPSD_AGGREGATOR_URL", default_value = "http://127.0.0.1:8080")]
    pub aggregator_url: String,

    /// Artifact server base URL. Without one, configs are read from the
    /// local config repository.
    #[arg(long, env = "NETOPSD_ARTIFACT_SOURCE")]
    pub artifact_source: Option<String>,

    /// Seconds between subscriber polls of each device.
    #[arg(long, env = "NETOPSD_POLL_INTERVAL", default_value_t = 30)]
    pub poll_interval: u64,

    /// Timeout in seconds for device RPCs and artifact downloads.
    #[arg(long, env = "NETOPSD_DEVICE_TIMEOUT", default_value_t = 10)]
    pub device_timeout: u64,

    /// Device reconciler workers.
    #[arg(long, env = "NETOPSD_WORKERS", default_value_t = 4)]
    pub workers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        repos: RepoArgs,
        #[command(flatten)]
        northbound: NorthboundArgs,
    }

    #[test]
    fn defaults_and_tls() {
        let cli = TestCli::parse_from([
            "netopsd",
            "--sync-period",
            "1",
            "--tls-cert",
            "/tls/crt",
            "--tls-key",
            "/tls/key",
        ]);
        assert_eq!(cli.repos.trunk, "main");
        assert_eq!(cli.repos.sync_period(), netops_core::MIN_SYNC_PERIOD);
        assert_eq!(
            cli.northbound.tls().mode().unwrap(),
            netops_core::TlsMode::ServerOnly {
                cert: "/tls/crt".into(),
                key: "/tls/key".into(),
            }
        );
        let opts = cli.northbound.set_options(&cli.repos.trunk);
        assert!(!opts.branch_per_commit);
        assert_eq!(opts.trunk, "main");
    }
}
