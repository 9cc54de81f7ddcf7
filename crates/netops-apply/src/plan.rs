//! Planning over a worktree status map.
//!
//! Everything here is a pure function of `GitRepo::status()` output.

use std::collections::{BTreeMap, BTreeSet};

use netops_core::{RepoPath, ServicePath, in_computed_dir};
use netops_git::{
    FileStatus, StatusCode, is_both_worktree_and_staging_tracked_and_changed,
    is_tracked_and_changed,
};

use crate::error::{ApplyError, ApplyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServiceOp {
    Update,
    Delete,
}

/// Services whose staged input changed, in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceCompilePlan {
    pub entries: Vec<(ServiceOp, ServicePath)>,
}

impl ServiceCompilePlan {
    pub fn from_status(status: &BTreeMap<String, FileStatus>) -> Self {
        let entries = status
            .iter()
            .filter(|(_, fs)| is_tracked_and_changed(fs.staging))
            .filter_map(|(path, fs)| match RepoPath::classify(path) {
                RepoPath::ServiceInput(service) => {
                    let op = if fs.staging == StatusCode::Deleted {
                        ServiceOp::Delete
                    } else {
                        ServiceOp::Update
                    };
                    Some((op, service))
                }
                _ => None,
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn deletes(&self) -> impl Iterator<Item = &ServicePath> {
        self.entries
            .iter()
            .filter(|(op, _)| *op == ServiceOp::Delete)
            .map(|(_, sp)| sp)
    }

    pub fn updates(&self) -> impl Iterator<Item = &ServicePath> {
        self.entries
            .iter()
            .filter(|(op, _)| *op == ServiceOp::Update)
            .map(|(_, sp)| sp)
    }
}

/// Devices whose computed artifacts changed in either direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCompositePlan {
    pub devices: BTreeSet<String>,
}

impl DeviceCompositePlan {
    pub fn from_status(status: &BTreeMap<String, FileStatus>) -> Self {
        let devices = status
            .iter()
            .filter(|(_, fs)| is_tracked_and_changed(fs.staging) || is_tracked_and_changed(fs.worktree))
            .filter_map(|(path, _)| match RepoPath::classify(path) {
                RepoPath::ServiceComputed { device, .. } => Some(device),
                _ => None,
            })
            .collect();
        Self { devices }
    }
}

/// Reject worktrees where controller-owned files were touched or where a
/// file is in a state the pipeline cannot reason about.
pub fn preflight(status: &BTreeMap<String, FileStatus>) -> ApplyResult<()> {
    for (path, fs) in status {
        let reject = |reason| {
            Err(ApplyError::Preflight {
                path: path.clone(),
                reason,
            })
        };
        if fs.worktree == StatusCode::UpdatedButUnmerged {
            return reject("file is unmerged");
        }
        let changed = is_tracked_and_changed(fs.staging) || is_tracked_and_changed(fs.worktree);
        if changed && in_computed_dir(path) {
            return reject("computed outputs are owned by the pipeline");
        }
        if changed && matches!(RepoPath::classify(path), RepoPath::DeviceConfig(_)) {
            return reject("device configs are owned by the pipeline");
        }
        if is_both_worktree_and_staging_tracked_and_changed(fs) {
            return reject("file has both staged and unstaged changes");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs(staging: StatusCode, worktree: StatusCode) -> FileStatus {
        FileStatus { staging, worktree }
    }

    fn status(entries: &[(&str, FileStatus)]) -> BTreeMap<String, FileStatus> {
        entries
            .iter()
            .map(|(p, s)| (p.to_string(), *s))
            .collect()
    }

    #[test]
    fn compile_plan_from_staged_inputs() {
        let st = status(&[
            ("services/foo/one/2/input.cue", fs(StatusCode::Added, StatusCode::Unmodified)),
            ("services/foo/old/1/input.cue", fs(StatusCode::Deleted, StatusCode::Unmodified)),
            ("services/foo/wip/input.cue", fs(StatusCode::Untracked, StatusCode::Untracked)),
            ("services/foo/transform.cue", fs(StatusCode::Modified, StatusCode::Unmodified)),
        ]);
        let plan = ServiceCompilePlan::from_status(&st);
        assert_eq!(
            plan.entries,
            vec![
                (
                    ServiceOp::Delete,
                    ServicePath::new("foo", vec!["old".into(), "1".into()])
                ),
                (
                    ServiceOp::Update,
                    ServicePath::new("foo", vec!["one".into(), "2".into()])
                ),
            ]
        );
        assert_eq!(plan.deletes().count(), 1);
        assert_eq!(plan.updates().count(), 1);
    }

    #[test]
    fn composite_plan_dedups_devices() {
        let st = status(&[
            ("services/foo/a/computed/dev1.cue", fs(StatusCode::Added, StatusCode::Unmodified)),
            ("services/bar/b/computed/dev1.cue", fs(StatusCode::Deleted, StatusCode::Unmodified)),
            ("services/bar/b/computed/dev2.cue", fs(StatusCode::Modified, StatusCode::Unmodified)),
            ("devices/dev3/config.cue", fs(StatusCode::Modified, StatusCode::Unmodified)),
        ]);
        let plan = DeviceCompositePlan::from_status(&st);
        assert_eq!(
            plan.devices.into_iter().collect::<Vec<_>>(),
            vec!["dev1", "dev2"]
        );
    }

    #[test]
    fn preflight_rejects_touched_computed_outputs() {
        let st = status(&[(
            "services/foo/one/two/computed/device1.cue",
            fs(StatusCode::Unmodified, StatusCode::Modified),
        )]);
        match preflight(&st) {
            Err(ApplyError::Preflight { path, .. }) => {
                assert_eq!(path, "services/foo/one/two/computed/device1.cue")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn preflight_rejects_device_configs_and_mixed_changes() {
        let device = status(&[(
            "devices/dev1/config.cue",
            fs(StatusCode::Modified, StatusCode::Unmodified),
        )]);
        assert!(preflight(&device).is_err());

        let mixed = status(&[(
            "services/foo/a/input.cue",
            fs(StatusCode::Modified, StatusCode::Modified),
        )]);
        assert!(preflight(&mixed).is_err());

        let unmerged = status(&[(
            "services/foo/a/input.cue",
            fs(StatusCode::UpdatedButUnmerged, StatusCode::UpdatedButUnmerged),
        )]);
        assert!(preflight(&unmerged).is_err());
    }

    #[test]
    fn preflight_accepts_staged_inputs_and_untracked_files() {
        let st = status(&[
            ("services/foo/a/input.cue", fs(StatusCode::Added, StatusCode::Unmodified)),
            ("notes.txt", fs(StatusCode::Untracked, StatusCode::Untracked)),
        ]);
        assert!(preflight(&st).is_ok());
    }
}
