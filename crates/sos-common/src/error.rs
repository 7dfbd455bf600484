//! Error types for observation service crates.

use thiserror::Error;

/// Result type alias using SosError.
pub type SosResult<T> = Result<T, SosError>;

/// Primary error type for service operations.
#[derive(Debug, Error)]
pub enum SosError {
    // === Request Errors ===
    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    // === Storage Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Cache error: {0}")]
    CacheError(String),
}

impl SosError {
    /// Get the OWS exception code for this error.
    pub fn ows_exception_code(&self) -> &'static str {
        match self {
            SosError::InvalidParameter { .. } => "InvalidParameterValue",
            _ => "NoApplicableCode",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            SosError::InvalidParameter { .. } => 400,
            _ => 500,
        }
    }
}
