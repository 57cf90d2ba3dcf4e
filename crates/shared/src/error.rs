//! Application-wide error types.

use thiserror::Error;

/// Result type alias using `AppError`.
pub type AppResult<T> = Result<T, AppError>;

/// Application error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error (malformed input, bad range header).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested byte range cannot be satisfied.
    #[error("Range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    /// Conflict (e.g., duplicate fragment).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No upload credential freed up within the admission window.
    #[error("Service busy: {0}")]
    ServiceBusy(String),

    /// The platform applied an account-wide throttle.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the block window elapses.
        retry_after_secs: u64,
    },

    /// The platform rejected our credentials.
    #[error("Upstream rejected credentials: {0}")]
    UpstreamAuth(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// External platform error.
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::RangeNotSatisfiable(_) => 416,
            Self::Conflict(_) => 409,
            Self::ServiceBusy(_) => 503,
            Self::RateLimited { .. } => 429,
            Self::UpstreamAuth(_) | Self::ExternalService(_) => 502,
            Self::Database(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RangeNotSatisfiable(_) => "RANGE_NOT_SATISFIABLE",
            Self::Conflict(_) => "CONFLICT",
            Self::ServiceBusy(_) => "SERVICE_BUSY",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::UpstreamAuth(_) => "UPSTREAM_AUTH",
            Self::Database(_) => "DATABASE_ERROR",
            Self::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
