use netops_git::GitError;
use netops_state::StateError;
use thiserror::Error;

pub type RolloutResult<T> = Result<T, RolloutError>;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for RolloutError {
    fn from(e: tokio::task::JoinError) -> Self {
        RolloutError::Task(e.to_string())
    }
}
