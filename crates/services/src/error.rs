//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::model::{AssemblyError, QuestionId, SessionId};
use exam_core::scoring::ScoringError;
use exam_core::tracker::TrackerError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `Catalog`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("question source unavailable: {0}")]
    NotFound(String),
    #[error("question content could not be decoded: {0}")]
    Content(String),
}

impl From<StorageError> for CatalogError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Serialization(msg) => CatalogError::Content(msg),
            other => CatalogError::NotFound(other.to_string()),
        }
    }
}

/// Rejected caller input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error("option {option} is out of range for question {question} ({options} options)")]
    OptionOutOfRange {
        question: QuestionId,
        option: usize,
        options: usize,
    },
}

/// Errors emitted by `CountdownController`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CountdownError {
    #[error("a countdown is already running for session {0}")]
    AlreadyRunning(SessionId),
    #[error("no countdown is running for session {0}")]
    NotRunning(SessionId),
}

/// Errors emitted by session services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("session {0} is not live")]
    NotLive(SessionId),
    #[error("session {0} belongs to another user")]
    Forbidden(SessionId),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Countdown(#[from] CountdownError),
}

impl From<AssemblyError> for SessionError {
    fn from(err: AssemblyError) -> Self {
        SessionError::Validation(ValidationError::Assembly(err))
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
