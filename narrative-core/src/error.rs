//! Error taxonomy for narrative operations.
//!
//! Every failure surfaced by [`NarrativeService`](crate::NarrativeService)
//! falls into one of four kinds; lower-layer errors convert into them with `?`.

use crate::context::ContextError;
use crate::generator::GenerationError;
use crate::store::StorageError;
use serde::Serialize;
use thiserror::Error;

/// Errors from NarrativeService operations.
#[derive(Debug, Error)]
pub enum NarrativeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Story not found: {0}")]
    NotFound(String),

    #[error("Generation failed: {0}")]
    GenerationFailure(#[from] GenerationError),

    #[error("Storage failure: {0}")]
    StorageFailure(#[from] StorageError),
}

impl NarrativeError {
    /// The coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NarrativeError::InvalidInput(_) => ErrorKind::InvalidInput,
            NarrativeError::NotFound(_) => ErrorKind::NotFound,
            NarrativeError::GenerationFailure(_) => ErrorKind::GenerationFailure,
            NarrativeError::StorageFailure(_) => ErrorKind::StorageFailure,
        }
    }

    /// Whether the caller can fix the request and try again.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidInput | ErrorKind::NotFound
        )
    }
}

impl From<ContextError> for NarrativeError {
    fn from(err: ContextError) -> Self {
        NarrativeError::InvalidInput(err.to_string())
    }
}

/// Coarse error category, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    GenerationFailure,
    StorageFailure,
}

impl ErrorKind {
    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::GenerationFailure => "generation_failure",
            ErrorKind::StorageFailure => "storage_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
