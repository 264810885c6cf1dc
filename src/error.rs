//! Centralized error types for the summary engine.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the foldersummary library.
#[derive(Error, Debug)]
pub enum SummaryError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The summary file is corrupt or truncated.
    #[error("Corrupt summary file '{path}': {reason}")]
    InvalidSummary { path: PathBuf, reason: String },

    /// The summary file was written by a version this build cannot interpret.
    #[error("Unsupported summary version {found} in '{path}' (supported {min}..={max})")]
    UnsupportedVersion {
        path: PathBuf,
        found: i32,
        min: i32,
        max: i32,
    },

    /// The summary has no backing file, so it cannot be loaded or saved.
    #[error("Summary has no backing file")]
    NoPath,

    /// A record allocated by another summary was passed in.
    #[error("Message info '{0}' belongs to a different summary")]
    ForeignRecord(String),

    /// A record without a uid was used where one is required.
    #[error("Message info has no uid")]
    MissingUid,

    /// No record with this uid is indexed.
    #[error("No message info with uid '{0}'")]
    UnknownUid(String),

    /// A store summary already holds a different entry for this path.
    #[error("Store info '{0}' already exists")]
    PathInUse(String),

    /// No store info with this path exists.
    #[error("No store info for path '{0}'")]
    UnknownPath(String),

    /// The uid of an indexed record cannot be changed.
    #[error("Message info '{0}' is indexed; its uid cannot change")]
    UidInUse(String),

    /// Every numeric uid is taken.
    #[error("No free message uid left")]
    UidSpaceExhausted,

    /// A streaming parser was not positioned at a header boundary.
    #[error("Parser is not at a message boundary (state {0:?})")]
    InvalidParserState(crate::parser::mbox::ParserState),

    /// A view or search expression could not be parsed.
    #[error("Invalid expression at {position}: {reason}")]
    InvalidExpression { position: usize, reason: String },

    /// A view with this id already exists with a different expression.
    #[error("View '{0}' already exists with a different expression")]
    ViewExists(String),

    /// No view with this id exists.
    #[error("View not found: {0}")]
    ViewNotFound(String),

    /// The root view cannot be deleted on its own.
    #[error("The root view cannot be deleted")]
    RootView,

    /// The view an iterator was bound to has been deleted.
    #[error("View '{0}' was deleted during iteration")]
    ViewDeleted(String),

    /// The collaborator backing an iterator failed.
    #[error("Message source error: {0}")]
    Source(String),

    /// The operation has no implementation for this record class.
    #[error("Operation not implemented for this record class: {0}")]
    NotImplemented(&'static str),
}

/// Convenience alias for `Result<T, SummaryError>`.
pub type Result<T> = std::result::Result<T, SummaryError>;

impl SummaryError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an `InvalidSummary` variant.
    pub fn invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidSummary {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an `InvalidExpression` variant.
    pub fn expression(position: usize, reason: impl Into<String>) -> Self {
        Self::InvalidExpression {
            position,
            reason: reason.into(),
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare; prefer `SummaryError::io`).
impl From<std::io::Error> for SummaryError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
