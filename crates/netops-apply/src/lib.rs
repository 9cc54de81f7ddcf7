//! netops-apply — the service-apply pipeline.
//!
//! Given a config worktree with staged changes to service inputs, compile
//! every changed service through its transformation module into
//! `computed/<device>.cue` artifacts, then compose each affected device's
//! `devices/<device>/config.cue` from all services contributing to it.
//!
//! # Components
//!
//! - **`plan`** — pure planning and pre-flight checks over a status map
//! - **`pipeline`** — `ServiceApply`, the executor over a `GitRepo`

pub mod error;
pub mod pipeline;
pub mod plan;

pub use error::{ApplyError, ApplyResult};
pub use pipeline::{ApplyReport, DeviceChange, ServiceApply};
pub use plan::{DeviceCompositePlan, ServiceCompilePlan, ServiceOp, preflight};
