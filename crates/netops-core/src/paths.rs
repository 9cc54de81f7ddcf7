//! Repository layout.
//!
//! Config repository:
//!
//! ```text
//! services/<kind>/
//!     metadata.json
//!     transform.cue
//!     <k1>/<k2>/…/
//!         input.cue
//!         computed/<device>.cue
//! devices/<name>/
//!     config.cue
//! ```
//!
//! Status repository:
//!
//! ```text
//! devices/<name>/actual_config.cue
//! ```
//!
//! All paths produced here are repo-relative and `/`-separated.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const SERVICES_DIR: &str = "services";
pub const DEVICES_DIR: &str = "devices";
pub const INPUT_FILE: &str = "input.cue";
pub const TRANSFORM_FILE: &str = "transform.cue";
pub const METADATA_FILE: &str = "metadata.json";
pub const COMPUTED_DIR: &str = "computed";
pub const CONFIG_FILE: &str = "config.cue";
pub const ACTUAL_CONFIG_FILE: &str = "actual_config.cue";
pub const CUE_EXT: &str = ".cue";

/// A service instance: `(kind, keys…)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServicePath {
    pub kind: String,
    pub keys: Vec<String>,
}

impl ServicePath {
    pub fn new(kind: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            kind: kind.into(),
            keys,
        }
    }

    /// `services/<kind>`
    pub fn kind_dir(kind: &str) -> String {
        format!("{SERVICES_DIR}/{kind}")
    }

    /// `services/<kind>/<k1>/…`
    pub fn dir(&self) -> String {
        let mut dir = Self::kind_dir(&self.kind);
        for key in &self.keys {
            dir.push('/');
            dir.push_str(key);
        }
        dir
    }

    pub fn input_file(&self) -> String {
        format!("{}/{INPUT_FILE}", self.dir())
    }

    pub fn computed_dir(&self) -> String {
        format!("{}/{COMPUTED_DIR}", self.dir())
    }

    pub fn computed_file(&self, device: &str) -> String {
        format!("{}/{device}{CUE_EXT}", self.computed_dir())
    }

    pub fn transform_file(&self) -> String {
        format!("{}/{TRANSFORM_FILE}", Self::kind_dir(&self.kind))
    }

    pub fn metadata_file(&self) -> String {
        format!("{}/{METADATA_FILE}", Self::kind_dir(&self.kind))
    }
}

impl fmt::Display for ServicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir())
    }
}

/// A device, identified by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DevicePath {
    pub name: String,
}

impl DevicePath {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn dir(&self) -> String {
        format!("{DEVICES_DIR}/{}", self.name)
    }

    /// Desired config, written by the service-apply pipeline.
    pub fn config_file(&self) -> String {
        format!("{}/{CONFIG_FILE}", self.dir())
    }

    /// Actual config, written by the aggregator.
    pub fn actual_config_file(&self) -> String {
        format!("{}/{ACTUAL_CONFIG_FILE}", self.dir())
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// What a repo-relative path denotes in the layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoPath {
    ServiceInput(ServicePath),
    ServiceComputed { service: ServicePath, device: String },
    ServiceModule { kind: String },
    DeviceConfig(DevicePath),
    DeviceActualConfig(DevicePath),
    Other,
}

impl RepoPath {
    pub fn classify(path: &str) -> Self {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        match parts.as_slice() {
            [DEVICES_DIR, name, CONFIG_FILE] => Self::DeviceConfig(DevicePath::new(*name)),
            [DEVICES_DIR, name, ACTUAL_CONFIG_FILE] => {
                Self::DeviceActualConfig(DevicePath::new(*name))
            }
            [SERVICES_DIR, kind, TRANSFORM_FILE | METADATA_FILE] => Self::ServiceModule {
                kind: kind.to_string(),
            },
            [SERVICES_DIR, kind, keys @ .., INPUT_FILE] => Self::ServiceInput(ServicePath::new(
                *kind,
                keys.iter().map(|k| k.to_string()).collect(),
            )),
            [SERVICES_DIR, kind, keys @ .., COMPUTED_DIR, file] => match file.strip_suffix(CUE_EXT) {
                Some(device) if !device.is_empty() => Self::ServiceComputed {
                    service: ServicePath::new(*kind, keys.iter().map(|k| k.to_string()).collect()),
                    device: device.to_string(),
                },
                _ => Self::Other,
            },
            _ => Self::Other,
        }
    }
}

/// Whether the directory holding `path` is a `computed/` directory.
pub fn in_computed_dir(path: &str) -> bool {
    path.rsplit_once('/')
        .map(|(dir, _)| dir == COMPUTED_DIR || dir.ends_with(&format!("/{COMPUTED_DIR}")))
        .unwrap_or(false)
}

/// Contents of `services/<kind>/metadata.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub version: String,
    /// Ordered input keys that address an instance of this service.
    #[serde(default)]
    pub keys: Vec<String>,
}
