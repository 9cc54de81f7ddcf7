//! netops-git — blocking façade over a git worktree.
//!
//! Every VCS call takes repo-relative, `/`-separated paths.
//! [`GitRepo::abs`] turns them into absolute paths for file I/O and logs.
//!
//! # Components
//!
//! - **`repo`** — `GitRepo`: open/clone, pull, stage, commit, push, reset
//! - **`status`** — per-file status codes and change predicates
//! - **`message`** — the `Updated: …` commit-message convention

pub mod error;
pub mod message;
pub mod repo;
pub mod status;

pub use error::{GitError, GitResult};
pub use message::{ChangeOp, CommitMessage};
pub use repo::{GitRepo, Head, RemoteHandle, RepoOptions};
pub use status::{
    FileStatus, StatusCode, is_both_worktree_and_staging_tracked_and_changed,
    is_tracked_and_changed,
};
