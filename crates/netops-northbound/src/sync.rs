//! Background pulls keeping the config and status worktrees current.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use netops_core::clamp_sync_period;
use netops_git::GitRepo;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{NorthboundError, NorthboundResult};

/// Periodically checks out and pulls `trunk` in one worktree.
pub struct RepoSync {
    name: &'static str,
    repo: Arc<Mutex<GitRepo>>,
    trunk: String,
    period: Duration,
}

impl RepoSync {
    /// `period` is clamped to the minimum sync period.
    pub fn new(name: &'static str, repo: Arc<Mutex<GitRepo>>, trunk: impl Into<String>, period: Duration) -> Self {
        Self {
            name,
            repo,
            trunk: trunk.into(),
            period: clamp_sync_period(period),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// One checkout + pull, holding the repository lock only for its
    /// duration.
    pub async fn sync_once(&self) -> NorthboundResult<()> {
        let repo = self.repo.clone();
        let trunk = self.trunk.clone();
        tokio::task::spawn_blocking(move || {
            let repo = repo.lock().unwrap_or_else(|p| p.into_inner());
            repo.checkout(&trunk, false)?;
            repo.pull(&trunk)?;
            Ok::<_, NorthboundError>(())
        })
        .await?
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(repo = self.name, period_secs = self.period.as_secs(), "repository sync started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.period) => {
                    match self.sync_once().await {
                        Ok(()) => debug!(repo = self.name, "repository synced"),
                        Err(e) => error!(repo = self.name, error = %e, "repository sync failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!(repo = self.name, "repository sync shutting down");
                    break;
                }
            }
        }
    }
}
