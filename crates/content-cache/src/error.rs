//! Error types for the content cache.

use sos_common::SosError;
use thiserror::Error;

/// Result type alias using CacheError.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised while updating or persisting the content cache.
///
/// Cloneable so that the failure of one rebuild can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The domain logic of an update failed.
    #[error("{update} failed: {message}")]
    UpdateFailed { update: String, message: String },

    /// The submitted update is unusable, or the controller is shut down.
    #[error("Illegal cache update submission: {0}")]
    IllegalSubmission(String),

    /// The backing store could not be read.
    #[error("Content source error: {0}")]
    Source(String),

    /// A persistence checkpoint failed.
    #[error("Cache persistence failed: {0}")]
    Persistence(String),

    /// A rebuild task ended without reporting an outcome.
    #[error("Cache rebuild aborted: {0}")]
    Aborted(String),
}

impl CacheError {
    pub fn update_failed(update: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::UpdateFailed {
            update: update.into(),
            message: message.into(),
        }
    }
}

impl From<SosError> for CacheError {
    fn from(err: SosError) -> Self {
        CacheError::Source(err.to_string())
    }
}

impl From<CacheError> for SosError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::IllegalSubmission(message) => SosError::InvalidParameter {
                param: "update".to_string(),
                message,
            },
            other => SosError::CacheError(other.to_string()),
        }
    }
}
