//! Device inventory and TLS configuration files.
//!
//! ```toml
//! [tls]
//! cert = "/etc/netops/tls.crt"
//! key = "/etc/netops/tls.key"
//! ca = "/etc/netops/ca.crt"
//!
//! [[device]]
//! name = "leaf1"
//! address = "10.0.0.11"
//! port = 57400
//! rollout = "fabric"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// TLS settings for a gRPC listener.
///
/// TLS is disabled unless both `cert` and `key` are set. With a `ca`,
/// client certificates are verified: required by default, optional
/// when `insecure` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub ca: Option<PathBuf>,
    #[serde(default)]
    pub insecure: bool,
}

/// Resolved TLS mode.
#[derive(Debug, Clone, PartialEq)]
pub enum TlsMode {
    Disabled,
    ServerOnly { cert: PathBuf, key: PathBuf },
    Mutual {
        cert: PathBuf,
        key: PathBuf,
        ca: PathBuf,
        client_auth_optional: bool,
    },
}

impl TlsConfig {
    pub fn mode(&self) -> Result<TlsMode, ConfigError> {
        match (&self.cert, &self.key, &self.ca) {
            (None, None, None) => Ok(TlsMode::Disabled),
            (Some(cert), Some(key), None) => Ok(TlsMode::ServerOnly {
                cert: cert.clone(),
                key: key.clone(),
            }),
            (Some(cert), Some(key), Some(ca)) => Ok(TlsMode::Mutual {
                cert: cert.clone(),
                key: key.clone(),
                ca: ca.clone(),
                client_auth_optional: self.insecure,
            }),
            _ => Err(ConfigError::Invalid(
                "TLS requires both a certificate and a key".to_string(),
            )),
        }
    }
}

/// One managed device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Name of the owning DeviceRollout.
    pub rollout: String,
    /// Config-repo revision the device is assumed to be provisioned with.
    pub base_revision: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Contents of an inventory file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub tls: Option<TlsConfig>,
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceEntry>,
}

impl Inventory {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let inventory: Inventory = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        inventory.validate()?;
        Ok(inventory)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if device.name.is_empty() {
                return Err(ConfigError::Invalid("device with empty name".to_string()));
            }
            if !seen.insert((&device.namespace, &device.name)) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate device {}/{}",
                    device.namespace, device.name
                )));
            }
        }
        Ok(())
    }
}
