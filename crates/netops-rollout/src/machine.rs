//! The DeviceRollout state machine.
//!
//! A rollout is idle unless `status.status` is `Running`. An idle
//! rollout whose spec differs from `status.desired_device_config_map`
//! starts a transaction. A running rollout waits for its devices:
//! success completes it, a failure while Healthy rolls back to the
//! previous map, a failure while rolling back is terminal.
//!
//! The transaction target is `desired` in Healthy and `prev` in Rollback.

use std::collections::BTreeSet;

use netops_state::{
    DeviceConfig, DeviceConfigMap, DeviceRollout, DeviceRolloutStatus, DeviceStatus,
    RESET_STATUS_ANNOTATION, RolloutPhase, RolloutStatus,
};
use tracing::{info, warn};

/// What a reconcile pass did to the rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    /// A new transaction began in Healthy.
    Started,
    Completed,
    /// A failure moved the rollout into Rollback.
    RolledBack,
    Failed,
}

/// Advance `rollout` by one step.
pub fn reconcile(rollout: &mut DeviceRollout) -> Transition {
    if rollout.metadata.annotations.remove(RESET_STATUS_ANNOTATION).is_some() {
        info!(rollout = %rollout.key(), "reset-status requested");
        return reset(rollout);
    }
    match rollout.status.status {
        Some(RolloutStatus::Running) => reconcile_running(rollout),
        _ => reconcile_idle(rollout),
    }
}

fn reconcile_idle(rollout: &mut DeviceRollout) -> Transition {
    if rollout.spec.device_config_map == rollout.status.desired_device_config_map {
        return Transition::Unchanged;
    }
    begin(rollout);
    Transition::Started
}

/// An idle reconcile regardless of the current status. With nothing new
/// in the spec the current transaction is retried from Healthy.
fn reset(rollout: &mut DeviceRollout) -> Transition {
    if rollout.spec.device_config_map != rollout.status.desired_device_config_map {
        begin(rollout);
    } else {
        let status = &mut rollout.status;
        status.phase = RolloutPhase::Healthy;
        status.status = Some(RolloutStatus::Running);
        start_tx(status);
    }
    Transition::Started
}

fn begin(rollout: &mut DeviceRollout) {
    let status = &mut rollout.status;
    if status.phase == RolloutPhase::Healthy {
        status.prev_device_config_map = std::mem::take(&mut status.desired_device_config_map);
    }
    status.desired_device_config_map = rollout.spec.device_config_map.clone();
    status.phase = RolloutPhase::Healthy;
    status.status = Some(RolloutStatus::Running);
    start_tx(status);
    info!(
        rollout = %rollout.key(),
        devices = rollout.status.desired_device_config_map.len(),
        "rollout started"
    );
}

fn reconcile_running(rollout: &mut DeviceRollout) -> Transition {
    let key = rollout.key();
    let status = &mut rollout.status;
    let states: Vec<DeviceStatus> = status.device_status_map.values().copied().collect();

    if states.iter().all(|s| {
        matches!(
            s,
            DeviceStatus::Purged | DeviceStatus::Synced | DeviceStatus::Completed
        )
    }) {
        status.status = Some(RolloutStatus::Completed);
        info!(rollout = %key, phase = ?status.phase, "rollout completed");
        return Transition::Completed;
    }

    let failed = states
        .iter()
        .any(|s| matches!(s, DeviceStatus::Failed | DeviceStatus::ConnectionError));
    if !failed {
        return Transition::Unchanged;
    }

    match status.phase {
        RolloutPhase::Healthy if !status.prev_device_config_map.is_empty() => {
            status.phase = RolloutPhase::Rollback;
            status.status = Some(RolloutStatus::Running);
            start_tx(status);
            warn!(rollout = %key, "device failure, rolling back");
            Transition::RolledBack
        }
        _ => {
            status.status = Some(RolloutStatus::Failed);
            warn!(rollout = %key, phase = ?status.phase, "rollout failed");
            Transition::Failed
        }
    }
}

/// Seed `device_status_map` for a new transaction: every target device
/// is Running, every other device of `desired ∪ prev` is Purged. Devices
/// in neither map are dropped.
pub fn start_tx(status: &mut DeviceRolloutStatus) {
    let target: BTreeSet<String> = target_map(status).keys().cloned().collect();
    let tracked: BTreeSet<String> = status
        .desired_device_config_map
        .keys()
        .chain(status.prev_device_config_map.keys())
        .cloned()
        .collect();
    status.device_status_map = tracked
        .into_iter()
        .map(|device| {
            let state = if target.contains(&device) {
                DeviceStatus::Running
            } else {
                DeviceStatus::Purged
            };
            (device, state)
        })
        .collect();
}

fn target_map(status: &DeviceRolloutStatus) -> &DeviceConfigMap {
    match status.phase {
        RolloutPhase::Healthy => &status.desired_device_config_map,
        RolloutPhase::Rollback => &status.prev_device_config_map,
    }
}

/// The config `device` should converge to in the current transaction.
/// Empty when the device is not targeted.
pub fn resolve_next_device_config(rollout: &DeviceRollout, device: &str) -> DeviceConfig {
    target_map(&rollout.status)
        .get(device)
        .cloned()
        .unwrap_or_default()
}
