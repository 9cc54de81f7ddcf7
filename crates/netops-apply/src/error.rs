use std::path::PathBuf;

use netops_git::GitError;
use netops_value::ValueError;
use thiserror::Error;

/// Result alias for pipeline operations.
pub type ApplyResult<T> = Result<T, ApplyError>;

#[derive(Debug, Error)]
pub enum ApplyError {
    /// The worktree is not in a state the pipeline may act on.
    #[error("pre-flight check failed for {path}: {reason}")]
    Preflight { path: String, reason: &'static str },

    #[error("{path}: {source}")]
    Value {
        path: String,
        #[source]
        source: ValueError,
    },

    #[error("{service}: transformation produced no output.devices")]
    MissingOutput { service: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Git(#[from] GitError),
}

impl ApplyError {
    pub(crate) fn value(path: impl Into<String>, source: ValueError) -> Self {
        Self::Value {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
