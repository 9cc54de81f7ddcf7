//! netops-state: the object store for DeviceRollout and Device objects,
//! and the reconcile controller runtime driven by its change events.

pub mod controller;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use controller::{Action, Controller, ReconcileError, Reconciler, WorkQueue};
pub use error::{StateError, StateResult};
pub use store::{StateStore, StoredObject};
pub use types::*;
