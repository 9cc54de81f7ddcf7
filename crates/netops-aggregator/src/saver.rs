//! Writes posted configs into the status worktree.

use std::sync::{Arc, Mutex};

use netops_core::DevicePath;
use netops_git::GitRepo;
use netops_value::{FormatOptions, format};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::error::{AggregatorError, AggregatorResult};
use crate::http::SaveConfigRequest;

pub struct Saver {
    repo: Arc<Mutex<GitRepo>>,
    queue: mpsc::Receiver<SaveConfigRequest>,
}

impl Saver {
    pub fn new(repo: Arc<Mutex<GitRepo>>, queue: mpsc::Receiver<SaveConfigRequest>) -> Self {
        Self { repo, queue }
    }

    /// Drain the queue until it closes or `shutdown` fires. Requests still
    /// queued at shutdown are dropped; subscribers post again.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("saver started");
        loop {
            tokio::select! {
                req = self.queue.recv() => {
                    let Some(req) = req else {
                        info!("save queue closed, saver exiting");
                        break;
                    };
                    let device = req.device.clone();
                    if let Err(e) = save(self.repo.clone(), req).await {
                        error!(device = %device, error = %e, "failed to save device config");
                    }
                }
                _ = shutdown.changed() => {
                    info!("saver shutting down");
                    break;
                }
            }
        }
    }
}

/// Canonicalise `req.config` and write `devices/<device>/actual_config.cue`.
pub async fn save(repo: Arc<Mutex<GitRepo>>, req: SaveConfigRequest) -> AggregatorResult<()> {
    tokio::task::spawn_blocking(move || {
        let device = &req.device;
        if device.is_empty() || device.contains(['/', '\\']) || device == "." || device == ".." {
            return Err(AggregatorError::InvalidDevice(device.clone()));
        }
        let value = netops_value::parse(&req.config).map_err(|source| AggregatorError::Value {
            device: device.clone(),
            source,
        })?;
        let text = format(&value, FormatOptions::default()).map_err(|source| {
            AggregatorError::Value {
                device: device.clone(),
                source,
            }
        })?;

        let rel = DevicePath::new(device.clone()).actual_config_file();
        let repo = repo.lock().unwrap_or_else(|p| p.into_inner());
        let abs = repo.abs(&rel);
        if let Some(dir) = abs.parent() {
            std::fs::create_dir_all(dir).map_err(|source| AggregatorError::Io {
                path: rel.clone(),
                source,
            })?;
        }
        std::fs::write(&abs, text).map_err(|source| AggregatorError::Io {
            path: rel.clone(),
            source,
        })?;
        debug!(device = %device, "saved actual config");
        Ok(())
    })
    .await?
}
