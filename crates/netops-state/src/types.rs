//! Stored object types: `DeviceRollout` and `Device`.
//!
//! Both are namespaced objects with `metadata`, `spec` and `status`, and
//! are stored as JSON.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Annotation that forces an idle reconcile of a rollout. It is cleared
/// once honoured.
pub const RESET_STATUS_ANNOTATION: &str = "netops.io/reset-status";

// ── Keys and metadata ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Rollout,
    Device,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectKind::Rollout => "rollout",
            ObjectKind::Device => "device",
        })
    }
}

/// `(namespace, name)` of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Bumped by the store on every write that changes the object.
    #[serde(default)]
    pub resource_version: u64,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

// ── DeviceRollout ──────────────────────────────────────────────

/// Target config artifact for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Hex SHA-256 of the config bytes.
    pub checksum: String,
    pub git_revision: String,
}

impl DeviceConfig {
    pub fn new(checksum: impl Into<String>, git_revision: impl Into<String>) -> Self {
        Self {
            checksum: checksum.into(),
            git_revision: git_revision.into(),
        }
    }
}

pub type DeviceConfigMap = BTreeMap<String, DeviceConfig>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRolloutSpec {
    #[serde(default)]
    pub device_config_map: DeviceConfigMap,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RolloutPhase {
    #[default]
    Healthy,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RolloutStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Running,
    Synced,
    Completed,
    Failed,
    ConnectionError,
    Purged,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRolloutStatus {
    #[serde(default)]
    pub phase: RolloutPhase,
    /// `None` until the first transaction starts.
    #[serde(default)]
    pub status: Option<RolloutStatus>,
    #[serde(default)]
    pub desired_device_config_map: DeviceConfigMap,
    #[serde(default)]
    pub prev_device_config_map: DeviceConfigMap,
    #[serde(default)]
    pub device_status_map: BTreeMap<String, DeviceStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRollout {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: DeviceRolloutSpec,
    #[serde(default)]
    pub status: DeviceRolloutStatus,
}

impl DeviceRollout {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

// ── Device ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Name of the owning DeviceRollout in the same namespace.
    #[serde(default)]
    pub rollout_ref: String,
    /// Revision whose config the device is assumed to already run.
    #[serde(default)]
    pub base_revision: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceObjectStatus {
    #[serde(default)]
    pub checksum: String,
    /// Canonical config text last pushed to the device.
    #[serde(default)]
    pub last_applied: String,
    #[serde(default)]
    pub base_revision: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub metadata: ObjectMeta,
    pub spec: DeviceSpec,
    #[serde(default)]
    pub status: DeviceObjectStatus,
}

impl Device {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: DeviceSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: DeviceObjectStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Key of the owning rollout, when one is referenced.
    pub fn rollout_key(&self) -> Option<ObjectKey> {
        (!self.spec.rollout_ref.is_empty())
            .then(|| ObjectKey::new(self.metadata.namespace.clone(), self.spec.rollout_ref.clone()))
    }

    /// `host:port` of the device's management endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.spec.address, self.spec.port)
    }
}

// ── Events ─────────────────────────────────────────────────────

/// Emitted by the store after a committed write that changed an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    pub kind: ObjectKind,
    pub key: ObjectKey,
}
