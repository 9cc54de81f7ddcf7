//! Error types for the typed-config language.

use std::path::PathBuf;

use thiserror::Error;

use crate::value::Kind;

/// Result alias for value operations.
pub type ValueResult<T> = Result<T, ValueError>;

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("conflicting values at {path}: {detail}")]
    Conflict { path: String, detail: String },

    #[error("incomplete value at {path}: {detail}")]
    Incomplete { path: String, detail: String },

    #[error("reference \"{0}\" not found")]
    Unresolved(String),

    #[error("number {value} at {path} does not fit a 64-bit integer")]
    OutOfRange { path: String, value: String },

    #[error("cannot convert {input:?} to {kind}")]
    Conversion { kind: Kind, input: String },

    #[error("evaluation error: {0}")]
    Eval(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    InFile {
        path: PathBuf,
        #[source]
        source: Box<ValueError>,
    },
}

impl ValueError {
    pub(crate) fn conflict(path: &[String], detail: impl Into<String>) -> Self {
        Self::Conflict {
            path: display_path(path),
            detail: detail.into(),
        }
    }

    pub(crate) fn incomplete(path: &[String], detail: impl Into<String>) -> Self {
        Self::Incomplete {
            path: display_path(path),
            detail: detail.into(),
        }
    }

    pub(crate) fn in_file(self, path: impl Into<PathBuf>) -> Self {
        Self::InFile {
            path: path.into(),
            source: Box::new(self),
        }
    }
}

pub(crate) fn display_path(path: &[String]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join(".")
    }
}
