//! Shared error types for the services crate.

use thiserror::Error;

use quiz_core::model::{QuestionError, SnapshotError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by a `QuestionGenerator`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GenerationError {
    #[error("question generation is not configured")]
    Disabled,
    #[error("question provider returned status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("question provider returned an unreadable response: {0}")]
    Malformed(String),
    #[error("question provider failed: {0}")]
    Provider(String),
}

/// Errors emitted by `StatsService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StatsError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `RecoveryService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecoveryError {
    #[error("saved session is corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RecoveryError {
    /// Whether the stored blob itself is unusable, as opposed to the backend.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            RecoveryError::Corrupt(_) | RecoveryError::Snapshot(_)
        )
    }
}

/// Contract violations reported by the quiz session.
///
/// Provider and storage failures never surface here for background writes;
/// they land in the session's error state or banner instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuizError {
    #[error("{operation} is not allowed while {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: &'static str,
    },
    #[error("option {option} is out of range for {len} options")]
    InvalidOption { option: usize, len: usize },
    #[error("question {index} is not loaded ({len} loaded)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error(transparent)]
    Stats(#[from] StatsError),
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

/// Errors emitted while reading configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid {var} value: {raw}")]
    InvalidValue { var: &'static str, raw: String },
    #[error(transparent)]
    Language(#[from] QuestionError),
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
