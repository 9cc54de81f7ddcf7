//! The device reconciler: converges one device onto the config its
//! rollout targets.
//!
//! Each pass first makes sure the device's subscriber is running, then:
//!
//! 1. re-baselines (ForceSet) when `spec.base_revision` moved;
//! 2. stops if there is no baseline yet;
//! 3. stops unless the rollout has this device Running;
//! 4. waits while the rollout has no target checksum for it;
//! 5. marks it Completed when it already runs the target;
//! 6. fetches the target artifact and verifies its checksum;
//! 7. diffs target against `last_applied` and pushes one Set;
//! 8. on success records the new checksum and config text;
//! 9. on failure marks the device failed in the rollout;
//! 10. writes device and rollout in one transaction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netops_core::{DevicePath, checksum};
use netops_rollout::resolve_next_device_config;
use netops_state::{
    Action, Device, DeviceConfig, DeviceRollout, DeviceStatus, Event, ObjectKey, ObjectKind,
    ReconcileError, Reconciler, StateStore,
};
use tracing::{debug, info, warn};

use crate::driver::{DEVICE_SET_TIMEOUT, DriverFactory, set_request};
use crate::error::{DeviceError, DeviceResult};
use crate::fetch::ArtifactFetcher;
use crate::workload::WorkloadManager;

/// Requeue delay while the rollout has nothing for this device.
pub const NO_TARGET_REQUEUE: Duration = Duration::from_secs(10);

pub struct DeviceReconciler {
    store: StateStore,
    fetcher: Arc<dyn ArtifactFetcher>,
    drivers: Arc<dyn DriverFactory>,
    workloads: Arc<dyn WorkloadManager>,
    set_timeout: Duration,
}

impl DeviceReconciler {
    pub fn new(
        store: StateStore,
        fetcher: Arc<dyn ArtifactFetcher>,
        drivers: Arc<dyn DriverFactory>,
        workloads: Arc<dyn WorkloadManager>,
    ) -> Self {
        Self {
            store,
            fetcher,
            drivers,
            workloads,
            set_timeout: DEVICE_SET_TIMEOUT,
        }
    }

    pub fn with_set_timeout(mut self, timeout: Duration) -> Self {
        self.set_timeout = timeout;
        self
    }

    /// Keys to reconcile for a store event: the device itself, or every
    /// device owned by a changed rollout.
    pub fn keys_for(store: &StateStore, event: &Event) -> Vec<ObjectKey> {
        match event.kind {
            ObjectKind::Device => vec![event.key.clone()],
            ObjectKind::Rollout => store
                .list_devices()
                .unwrap_or_default()
                .into_iter()
                .filter(|d| d.rollout_key().as_ref() == Some(&event.key))
                .map(|d| d.key())
                .collect(),
        }
    }

    /// Take the config at `spec.base_revision` as what the device runs,
    /// without touching the device.
    async fn force_set(&self, device: &Device) -> DeviceResult<()> {
        let name = &device.metadata.name;
        let revision = device.spec.base_revision.clone();
        let bytes = self
            .fetcher
            .fetch(&revision, &DevicePath::new(name.clone()).config_file())
            .await?;
        let text = String::from_utf8(bytes).map_err(|_| DeviceError::Encoding(name.clone()))?;
        let sum = checksum(text.as_bytes());
        self.store.update_device(&device.key(), |d| {
            d.status.checksum = sum.clone();
            d.status.last_applied = text;
            d.status.base_revision = revision.clone();
        })?;
        info!(device = %device.key(), %revision, checksum = %sum, "baseline set");
        Ok(())
    }

    /// Steps 6 to 10 for a device that needs `next`.
    async fn push(
        &self,
        device: &Device,
        rollout_key: &ObjectKey,
        next: &DeviceConfig,
    ) -> DeviceResult<()> {
        let name = device.metadata.name.clone();
        let bytes = self
            .fetcher
            .fetch(&next.git_revision, &DevicePath::new(name.clone()).config_file())
            .await?;
        let actual = checksum(&bytes);
        if actual != next.checksum {
            return Err(DeviceError::ChecksumMismatch {
                device: name,
                expected: next.checksum.clone(),
                actual,
            });
        }
        let text = String::from_utf8(bytes).map_err(|_| DeviceError::Encoding(name.clone()))?;

        let old = netops_value::parse(&device.status.last_applied)
            .map_err(|e| DeviceError::value(name.clone(), e))?;
        let new = netops_value::parse(&text).map_err(|e| DeviceError::value(name.clone(), e))?;
        let diff = netops_value::diff(&old, &new).map_err(|e| DeviceError::value(name.clone(), e))?;

        let outcome = if diff.is_empty() {
            debug!(device = %device.key(), "no config changes to push");
            Ok(())
        } else {
            let request = set_request(&diff).map_err(|e| DeviceError::value(name.clone(), e))?;
            let driver = self.drivers.driver(device);
            match tokio::time::timeout(self.set_timeout, driver.set(request)).await {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(DeviceError::Connection {
                    endpoint: device.endpoint(),
                    message: format!("set timed out after {:?}", self.set_timeout),
                }),
            }
        };

        let state = match &outcome {
            Ok(()) => {
                info!(
                    device = %device.key(),
                    revision = %next.git_revision,
                    updates = diff.updates.len(),
                    deletes = diff.deletes.len(),
                    "config applied"
                );
                DeviceStatus::Completed
            }
            Err(e) if e.is_connection() => {
                warn!(device = %device.key(), error = %e, "device unreachable");
                DeviceStatus::ConnectionError
            }
            Err(e) => {
                warn!(device = %device.key(), error = %e, "config push failed");
                DeviceStatus::Failed
            }
        };

        let applied = outcome.is_ok();
        self.store
            .patch_device_and_rollout(&device.key(), rollout_key, |dev, rollout| {
                if applied {
                    dev.status.checksum = next.checksum.clone();
                    dev.status.last_applied = text;
                }
                // The rollout may have moved on while the Set was in flight.
                if still_targets(rollout, &name, next) {
                    rollout.status.device_status_map.insert(name.clone(), state);
                }
            })?;
        Ok(())
    }

    fn mark_completed(&self, rollout_key: &ObjectKey, name: &str, next: &DeviceConfig) -> DeviceResult<()> {
        self.store.update_rollout(rollout_key, |rollout| {
            if still_targets(rollout, name, next) {
                rollout
                    .status
                    .device_status_map
                    .insert(name.to_string(), DeviceStatus::Completed);
            }
        })?;
        Ok(())
    }
}

fn still_targets(rollout: &DeviceRollout, name: &str, next: &DeviceConfig) -> bool {
    rollout.status.device_status_map.get(name) == Some(&DeviceStatus::Running)
        && resolve_next_device_config(rollout, name) == *next
}

#[async_trait]
impl Reconciler for DeviceReconciler {
    fn name(&self) -> &'static str {
        "device"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let Some(device) = self.store.get_device(key)? else {
            self.workloads.remove(key).await?;
            return Ok(Action::Done);
        };
        let name = device.metadata.name.as_str();

        if self.workloads.ensure(&device).await? {
            info!(device = %key, "subscriber started");
        }

        // Re-baseline when the base revision moved.
        if !device.spec.base_revision.is_empty()
            && device.spec.base_revision != device.status.base_revision
        {
            self.force_set(&device).await?;
            return Ok(Action::Done);
        }

        if device.status.last_applied.is_empty() {
            debug!(device = %key, "no baseline config, waiting");
            return Ok(Action::Done);
        }

        let Some(rollout_key) = device.rollout_key() else {
            return Ok(Action::Done);
        };
        let Some(rollout) = self.store.get_rollout(&rollout_key)? else {
            debug!(device = %key, rollout = %rollout_key, "rollout not found");
            return Ok(Action::Done);
        };
        if rollout.status.device_status_map.get(name) != Some(&DeviceStatus::Running) {
            return Ok(Action::Done);
        }

        let next = resolve_next_device_config(&rollout, name);
        if next.checksum.is_empty() {
            return Ok(Action::RequeueAfter(NO_TARGET_REQUEUE));
        }

        if next.checksum == device.status.checksum {
            self.mark_completed(&rollout_key, name, &next)?;
            debug!(device = %key, checksum = %next.checksum, "already at target");
            return Ok(Action::Done);
        }

        self.push(&device, &rollout_key, &next).await?;
        Ok(Action::Done)
    }
}
