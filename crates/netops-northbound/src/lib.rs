//! netops-northbound — the gNMI-style configuration API.
//!
//! Capabilities, Get and Set over service inputs in the config
//! repository and actual device configs in the status repository.
//!
//! # Components
//!
//! - **`server`** — `NorthboundServer`, the tonic service and its locks
//! - **`set`** — the Set transaction: write inputs, run the pipeline, commit
//! - **`get`** — reads as JSON notifications
//! - **`path`** — gNMI-style paths to service and device paths
//! - **`module`** — per-kind key order and `#Input` schema
//! - **`sync`** — background pulls of both repositories
//! - **`tls`** — listener TLS

pub mod error;
pub mod get;
pub mod module;
pub mod path;
pub mod server;
pub mod set;
pub mod sync;
pub mod tls;

pub use error::{NorthboundError, NorthboundResult};
pub use path::PathReq;
pub use server::NorthboundServer;
pub use set::SetOptions;
pub use sync::RepoSync;
