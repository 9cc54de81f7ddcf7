//! netops-aggregator — collects actual device configs into the status
//! repository.
//!
//! Subscribers `POST /commit` with `{device, config}`. The saver writes
//! each config to `devices/<device>/actual_config.cue`; the committer
//! batches everything written since its last run into one commit.

pub mod committer;
pub mod error;
pub mod http;
pub mod saver;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use netops_git::GitRepo;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

pub use committer::Committer;
pub use error::{AggregatorError, AggregatorResult};
pub use http::{SaveConfigRequest, router};
pub use saver::Saver;

/// Aggregator settings.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub trunk: String,
    pub update_check_duration: Duration,
    pub queue_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            trunk: netops_core::DEFAULT_TRUNK.to_string(),
            update_check_duration: Duration::from_secs(5),
            queue_capacity: 1024,
        }
    }
}

/// Saver, committer and ingest router sharing one status worktree.
pub struct Aggregator {
    repo: Arc<Mutex<GitRepo>>,
    config: AggregatorConfig,
    tx: mpsc::Sender<SaveConfigRequest>,
    rx: mpsc::Receiver<SaveConfigRequest>,
}

impl Aggregator {
    pub fn new(repo: GitRepo, config: AggregatorConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            repo: Arc::new(Mutex::new(repo)),
            config,
            tx,
            rx,
        }
    }

    /// Start the saver and committer loops.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> (axum::Router, Vec<JoinHandle<()>>) {
        let router = router(self.tx);
        let saver = Saver::new(self.repo.clone(), self.rx);
        let committer = Committer::new(
            self.repo,
            self.config.trunk,
            self.config.update_check_duration,
        );
        let handles = vec![
            tokio::spawn(saver.run(shutdown.clone())),
            tokio::spawn(committer.run(shutdown)),
        ];
        (router, handles)
    }

    /// Run the loops and serve the ingest endpoint until `shutdown` fires.
    pub async fn serve(self, addr: SocketAddr, shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        let mut stop = shutdown.clone();
        let (router, handles) = self.spawn(shutdown);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "aggregator listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop.changed().await;
            })
            .await?;
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}
