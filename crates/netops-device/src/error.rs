use netops_git::GitError;
use netops_state::{ReconcileError, StateError};
use netops_value::ValueError;
use thiserror::Error;

pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device could not be reached.
    #[error("connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    /// The device answered but refused or failed the request.
    #[error("device {endpoint} rejected request: {message}")]
    Rejected { endpoint: String, message: String },

    #[error("failed to fetch {what}: {message}")]
    Fetch { what: String, message: String },

    #[error("artifact checksum mismatch for {device}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        device: String,
        expected: String,
        actual: String,
    },

    #[error("invalid config for {device}: {source}")]
    Value {
        device: String,
        #[source]
        source: ValueError,
    },

    #[error("config for {0} is not valid UTF-8")]
    Encoding(String),

    #[error("aggregator request failed: {0}")]
    Aggregator(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl DeviceError {
    pub fn value(device: impl Into<String>, source: ValueError) -> Self {
        DeviceError::Value {
            device: device.into(),
            source,
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, DeviceError::Connection { .. })
    }
}

impl From<tokio::task::JoinError> for DeviceError {
    fn from(e: tokio::task::JoinError) -> Self {
        DeviceError::Task(e.to_string())
    }
}

/// Bad artifacts and bad configs need a new revision, not a retry.
impl From<DeviceError> for ReconcileError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::ChecksumMismatch { .. }
            | DeviceError::Value { .. }
            | DeviceError::Encoding(_) => ReconcileError::Permanent(e.to_string()),
            DeviceError::State(e) => e.into(),
            other => ReconcileError::Transient(other.to_string()),
        }
    }
}
