//! Commit-message convention.
//!
//! ```text
//! Updated: services/foo/one/2 dev1 dev2
//!
//! Services:
//! added: services/foo/one/2
//!
//! Devices:
//! added: dev1
//! modified: dev2
//! ```
//!
//! Names are grouped by operation (added, deleted, modified) and sorted
//! within each group; services and devices sort together in the title.

use std::collections::BTreeMap;
use std::fmt;

use netops_core::RepoPath;

use crate::status::{FileStatus, StatusCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeOp {
    Added,
    Deleted,
    Modified,
}

impl ChangeOp {
    /// Classify a staged change.
    pub fn from_staging(code: StatusCode) -> Option<Self> {
        match code {
            StatusCode::Added => Some(ChangeOp::Added),
            StatusCode::Deleted => Some(ChangeOp::Deleted),
            StatusCode::Modified | StatusCode::Renamed | StatusCode::Copied => {
                Some(ChangeOp::Modified)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeOp::Added => "added",
            ChangeOp::Deleted => "deleted",
            ChangeOp::Modified => "modified",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Section {
    Service,
    Device,
}

/// Builder for a change-set commit message.
#[derive(Debug, Clone, Default)]
pub struct CommitMessage {
    entries: Vec<(ChangeOp, String, Section)>,
}

impl CommitMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect staged service inputs and device configs from a status map.
    pub fn from_status(status: &BTreeMap<String, FileStatus>) -> Self {
        let mut msg = Self::new();
        for (path, fs) in status {
            let Some(op) = ChangeOp::from_staging(fs.staging) else {
                continue;
            };
            match RepoPath::classify(path) {
                RepoPath::ServiceInput(service) => msg.service(op, service.to_string()),
                RepoPath::DeviceConfig(device) | RepoPath::DeviceActualConfig(device) => {
                    msg.device(op, device.name)
                }
                _ => {}
            }
        }
        msg
    }

    pub fn service(&mut self, op: ChangeOp, name: impl Into<String>) {
        self.push(op, name.into(), Section::Service);
    }

    pub fn device(&mut self, op: ChangeOp, name: impl Into<String>) {
        self.push(op, name.into(), Section::Device);
    }

    fn push(&mut self, op: ChangeOp, name: String, section: Section) {
        let entry = (op, name, section);
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        let names: Vec<&str> = entries.iter().map(|(_, name, _)| name.as_str()).collect();
        let mut out = format!("Updated: {}", names.join(" "));
        for (section, heading) in [(Section::Service, "Services:"), (Section::Device, "Devices:")] {
            let lines: Vec<String> = entries
                .iter()
                .filter(|(_, _, s)| *s == section)
                .map(|(op, name, _)| format!("{op}: {name}"))
                .collect();
            if lines.is_empty() {
                continue;
            }
            out.push_str("\n\n");
            out.push_str(heading);
            for line in lines {
                out.push('\n');
                out.push_str(&line);
            }
        }
        out.push('\n');
        out
    }
}
