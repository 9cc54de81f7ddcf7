//! netops-device: pushes rollout targets to devices and reports back what
//! they run.
//!
//! - **`reconciler`**: the device reconciler (baseline, diff, Set, status)
//! - **`driver`**: the device driver seam and its gNMI implementation
//! - **`fetch`**: config artifacts from a local clone or an artifact server
//! - **`workload`**: per-device subscribers feeding the aggregator

pub mod driver;
pub mod error;
pub mod fetch;
pub mod reconciler;
pub mod workload;

pub use driver::{
    DEVICE_SET_TIMEOUT, DeviceDriver, DriverFactory, GnmiDriver, GnmiDriverFactory, set_request,
};
pub use error::{DeviceError, DeviceResult};
pub use fetch::{ArtifactFetcher, GitArtifactFetcher, HttpArtifactFetcher};
pub use reconciler::{DeviceReconciler, NO_TARGET_REQUEUE};
pub use workload::{
    DEFAULT_POLL_INTERVAL, Subscriber, SubscriberSpec, TaskWorkloadManager, WorkloadManager,
};
