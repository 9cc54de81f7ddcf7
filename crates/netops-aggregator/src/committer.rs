//! Periodically commits whatever the saver has written.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use netops_core::DEVICES_DIR;
use netops_git::{CommitMessage, GitRepo, StatusCode, is_tracked_and_changed};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{AggregatorError, AggregatorResult};

pub struct Committer {
    repo: Arc<Mutex<GitRepo>>,
    trunk: String,
    period: Duration,
}

impl Committer {
    pub fn new(repo: Arc<Mutex<GitRepo>>, trunk: impl Into<String>, period: Duration) -> Self {
        Self {
            repo,
            trunk: trunk.into(),
            period,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(period_ms = self.period.as_millis() as u64, "committer started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.period) => {
                    match self.commit_once().await {
                        Ok(Some(id)) => debug!(commit = %id, "status commit pushed"),
                        Ok(None) => {}
                        Err(e) => error!(error = %e, "status commit failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("committer shutting down");
                    break;
                }
            }
        }
    }

    /// One iteration. Returns the new commit id, or `None` when there
    /// was nothing to commit.
    pub async fn commit_once(&self) -> AggregatorResult<Option<String>> {
        let repo = self.repo.clone();
        let trunk = self.trunk.clone();
        tokio::task::spawn_blocking(move || {
            let repo = repo.lock().unwrap_or_else(|p| p.into_inner());
            commit_changes(&repo, &trunk)
        })
        .await?
    }
}

fn commit_changes(repo: &GitRepo, trunk: &str) -> AggregatorResult<Option<String>> {
    repo.pull(trunk)?;
    repo.checkout(trunk, false)?;
    let gone = repo.remove_gone_branches()?;
    if !gone.is_empty() {
        debug!(branches = ?gone, "pruned gone branches");
    }
    repo.add(DEVICES_DIR)?;

    let status = repo.status()?;
    if !status.values().any(|fs| is_tracked_and_changed(fs.staging)) {
        return Ok(None);
    }
    for (path, fs) in &status {
        if fs.worktree != StatusCode::Unmodified {
            return Err(AggregatorError::Preflight { path: path.clone() });
        }
    }

    let message = CommitMessage::from_status(&status);
    let id = repo.commit(&message.render())?;
    if repo.has_origin() {
        repo.push(trunk)?;
    }
    info!(commit = %id, files = status.len(), "committed device configs");
    Ok(Some(id))
}
