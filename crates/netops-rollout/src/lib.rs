//! netops-rollout: staged config rollouts across a set of devices.
//!
//! - **`machine`**: the DeviceRollout state machine (idle, StartTx,
//!   running, reset-status) and `resolve_next_device_config`
//! - **`reconciler`**: runs the machine under the controller runtime and
//!   persists status through the object store
//! - **`watcher`**: refreshes a rollout's spec from config-repo trunk

pub mod error;
pub mod machine;
pub mod reconciler;
pub mod watcher;

pub use error::{RolloutError, RolloutResult};
pub use machine::{Transition, resolve_next_device_config, start_tx};
pub use reconciler::RolloutReconciler;
pub use watcher::RolloutWatcher;
