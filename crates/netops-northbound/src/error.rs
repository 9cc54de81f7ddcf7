use netops_apply::ApplyError;
use netops_git::GitError;
use netops_value::ValueError;
use thiserror::Error;
use tonic::Status;
use tracing::error;

/// Result alias for northbound operations.
pub type NorthboundResult<T> = Result<T, NorthboundError>;

#[derive(Debug, Error)]
pub enum NorthboundError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("locked")]
    Locked,

    #[error("{path}: {source}")]
    Value {
        path: String,
        #[source]
        source: ValueError,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Config(#[from] netops_core::ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("stored configuration is invalid: {0}")]
    Corrupt(String),

    #[error("task failed: {0}")]
    Task(String),
}

impl NorthboundError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn value(path: impl Into<String>, source: ValueError) -> Self {
        Self::Value {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<tokio::task::JoinError> for NorthboundError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

impl From<NorthboundError> for Status {
    fn from(e: NorthboundError) -> Self {
        match e {
            NorthboundError::InvalidArgument(msg) => Status::invalid_argument(msg),
            NorthboundError::NotFound(msg) => Status::not_found(msg),
            NorthboundError::Locked => Status::unavailable("locked"),
            NorthboundError::Apply(ApplyError::Preflight { path, reason }) => {
                Status::internal(format!("pre-flight check failed for {path}: {reason}"))
            }
            other => {
                error!(error = %other, "northbound request failed");
                let summary = match &other {
                    NorthboundError::Value { path, .. } => format!("invalid configuration at {path}"),
                    NorthboundError::Apply(_) => "service apply failed".to_string(),
                    NorthboundError::Git(_) => "repository operation failed".to_string(),
                    _ => "internal error".to_string(),
                };
                Status::internal(summary)
            }
        }
    }
}
