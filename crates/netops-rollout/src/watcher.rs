//! Rollout watcher: turns new config-repo trunk commits into
//! DeviceRollout specs.
//!
//! When trunk moves, every `devices/<name>/config.cue` at the new head is
//! read and checksummed. Devices whose checksum did not change keep the
//! revision they already had, so an unrelated commit does not send them
//! a no-op rollout.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use netops_core::{CONFIG_FILE, DEVICES_DIR, checksum, clamp_sync_period};
use netops_git::GitRepo;
use netops_state::{DeviceConfig, DeviceConfigMap, DeviceRollout, ObjectKey, StateStore};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::RolloutResult;

pub struct RolloutWatcher {
    repo: Arc<Mutex<GitRepo>>,
    store: StateStore,
    rollout: ObjectKey,
    trunk: String,
    period: Duration,
    devices: Option<BTreeSet<String>>,
    last_seen: Option<String>,
}

impl RolloutWatcher {
    /// `period` is clamped to the minimum sync period.
    pub fn new(
        repo: Arc<Mutex<GitRepo>>,
        store: StateStore,
        rollout: ObjectKey,
        trunk: impl Into<String>,
        period: Duration,
    ) -> Self {
        Self {
            repo,
            store,
            rollout,
            trunk: trunk.into(),
            period: clamp_sync_period(period),
            devices: None,
            last_seen: None,
        }
    }

    /// Only track these devices instead of everything under `devices/`.
    pub fn with_devices(mut self, devices: impl IntoIterator<Item = String>) -> Self {
        self.devices = Some(devices.into_iter().collect());
        self
    }

    /// Check trunk once. Returns the new revision when the rollout spec
    /// was refreshed.
    pub async fn poll_once(&mut self) -> RolloutResult<Option<String>> {
        let repo = self.repo.clone();
        let trunk = self.trunk.clone();
        let last_seen = self.last_seen.clone();
        let snapshot = tokio::task::spawn_blocking(move || {
            let repo = repo.lock().unwrap_or_else(|p| p.into_inner());
            match repo.resolve(&trunk)? {
                Some(rev) if Some(&rev) != last_seen.as_ref() => {
                    let configs = read_configs(&repo, &rev)?;
                    Ok::<_, netops_git::GitError>(Some((rev, configs)))
                }
                _ => Ok(None),
            }
        })
        .await??;

        let Some((rev, configs)) = snapshot else {
            return Ok(None);
        };
        self.apply(&rev, configs)?;
        self.last_seen = Some(rev.clone());
        Ok(Some(rev))
    }

    fn apply(&self, rev: &str, configs: Vec<(String, String)>) -> RolloutResult<()> {
        let existing = self.store.get_rollout(&self.rollout)?;
        let previous = existing
            .as_ref()
            .map(|r| r.spec.device_config_map.clone())
            .unwrap_or_default();

        let map: DeviceConfigMap = configs
            .into_iter()
            .filter(|(device, _)| self.devices.as_ref().is_none_or(|d| d.contains(device)))
            .map(|(device, sum)| {
                let revision = match previous.get(&device) {
                    Some(prev) if prev.checksum == sum => prev.git_revision.clone(),
                    _ => rev.to_string(),
                };
                (device, DeviceConfig::new(sum, revision))
            })
            .collect();
        let changed = map != previous;

        // Only the spec is touched; status belongs to the reconcilers.
        let stored = match existing {
            Some(_) => self
                .store
                .update_rollout(&self.rollout, |r| r.spec.device_config_map = map)?,
            None => {
                let mut rollout =
                    DeviceRollout::new(self.rollout.namespace.clone(), self.rollout.name.clone());
                rollout.spec.device_config_map = map;
                self.store.put_rollout(&rollout)?
            }
        };
        info!(
            rollout = %self.rollout,
            revision = %rev,
            devices = stored.spec.device_config_map.len(),
            changed,
            "rollout spec refreshed"
        );
        Ok(())
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(rollout = %self.rollout, period_secs = self.period.as_secs(), "rollout watcher started");
        loop {
            match self.poll_once().await {
                Ok(Some(rev)) => debug!(rollout = %self.rollout, revision = %rev, "trunk moved"),
                Ok(None) => {}
                Err(e) => error!(rollout = %self.rollout, error = %e, "rollout watch failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                _ = shutdown.changed() => {
                    info!(rollout = %self.rollout, "rollout watcher shutting down");
                    break;
                }
            }
        }
    }
}

/// `(device, checksum)` for every device config at `rev`.
fn read_configs(repo: &GitRepo, rev: &str) -> netops_git::GitResult<Vec<(String, String)>> {
    let mut out = Vec::new();
    for path in repo.list_files_at(rev, DEVICES_DIR)? {
        let parts: Vec<&str> = path.split('/').collect();
        let [_, device, file] = parts.as_slice() else {
            continue;
        };
        if *file != CONFIG_FILE {
            continue;
        }
        let bytes = repo.read_file_at(rev, &path)?;
        out.push((device.to_string(), checksum(&bytes)));
    }
    Ok(out)
}
