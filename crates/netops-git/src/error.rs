use std::path::PathBuf;

use thiserror::Error;

/// Result alias for git operations.
pub type GitResult<T> = Result<T, GitError>;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git: {0}")]
    Git(#[from] git2::Error),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no repository at {0} and cloning is disabled")]
    NotFound(PathBuf),

    #[error("branch {0} not found")]
    BranchNotFound(String),

    #[error("branch {0}: local and remote have diverged")]
    NonFastForward(String),

    #[error("push of {reference} rejected: {message}")]
    PushRejected { reference: String, message: String },

    #[error("invalid repository path {0:?}")]
    InvalidPath(String),
}

impl GitError {
    /// A missing object, path, reference or branch.
    pub fn is_not_found(&self) -> bool {
        match self {
            GitError::Git(e) => e.code() == git2::ErrorCode::NotFound,
            GitError::BranchNotFound(_) | GitError::NotFound(_) => true,
            _ => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
