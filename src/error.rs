//! Error types for fdrun.

use thiserror::Error;

use crate::classify::ErrorCode;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl ErrorCode for Error {
    fn error_code(&self) -> Option<&str> {
        match self {
            Error::Io(e) => e.error_code(),
            _ => None,
        }
    }
}

/// Why a collected batch did not produce its results.
#[derive(Debug, Error)]
pub enum BatchError<E> {
    /// An action failed with an error its classifier deemed unrecoverable.
    #[error("batch failed: {0}")]
    Action(E),

    /// The batch ended without a terminal event (an action panicked or the
    /// runtime shut down).
    #[error("batch aborted before reaching a terminal state")]
    Aborted,
}

impl<E> BatchError<E> {
    /// The action error, if this is one.
    pub fn into_action_error(self) -> Option<E> {
        match self {
            BatchError::Action(e) => Some(e),
            BatchError::Aborted => None,
        }
    }
}

impl From<BatchError<std::io::Error>> for Error {
    fn from(e: BatchError<std::io::Error>) -> Self {
        match e {
            BatchError::Action(source) => Error::Io(source),
            BatchError::Aborted => Error::Other("batch aborted before completing".to_string()),
        }
    }
}
