//! netops-core — types shared by every netops crate.
//!
//! - **`paths`** — on-disk layout of the config and status repositories,
//!   `ServicePath` / `DevicePath`, and classification of repo paths
//! - **`config`** — TOML device inventory and TLS settings
//! - **`source`** — artifact source URLs and the `SOURCE_HOST` redirect
//! - **`types`** — checksums and time helpers

pub mod config;
pub mod paths;
pub mod source;
pub mod types;

pub use config::{ConfigError, DeviceEntry, Inventory, TlsConfig, TlsMode};
pub use paths::{
    ACTUAL_CONFIG_FILE, COMPUTED_DIR, CONFIG_FILE, CUE_EXT, DEVICES_DIR, DevicePath, INPUT_FILE,
    METADATA_FILE, RepoPath, SERVICES_DIR, ServiceMetadata, ServicePath, TRANSFORM_FILE,
    in_computed_dir,
};
pub use source::SourceUrl;
pub use types::*;
