use netops_git::GitError;
use netops_value::ValueError;
use thiserror::Error;

/// Result alias for aggregator operations.
pub type AggregatorResult<T> = Result<T, AggregatorError>;

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("invalid device name {0:?}")]
    InvalidDevice(String),

    #[error("config for {device} does not parse: {source}")]
    Value {
        device: String,
        #[source]
        source: ValueError,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pre-flight check failed for {path}: file has unstaged changes")]
    Preflight { path: String },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for AggregatorError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}
