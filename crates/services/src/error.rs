//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::session::SessionError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors from reading service configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Errors emitted by the attempt API client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("attempt api request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("failed to encode progress: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Errors emitted while running an attempt.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AttemptError {
    #[error("attempt loop has stopped")]
    LoopClosed,
    #[error(transparent)]
    Domain(#[from] exam_core::Error),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
}

impl From<SessionError> for AttemptError {
    fn from(err: SessionError) -> Self {
        Self::Domain(err.into())
    }
}
