use thiserror::Error;

/// Errors surfaced by [`ApiClient`](crate::ApiClient) after its retry policy
/// has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Quota exhausted and either the retry budget ran out or the reset is
    /// further away than the configured maximum wait.
    #[error("rate limit exceeded (status {status}, remaining {remaining}, resets at {reset_at})")]
    RateLimitExceeded {
        status: u16,
        remaining: u32,
        /// Epoch seconds at which the quota resets.
        reset_at: u64,
    },

    /// Server-side failure, timeout or connection failure that persisted
    /// through every retry.
    #[error("service unavailable after {attempts} attempts: {message}")]
    TransientServiceError {
        status: Option<u16>,
        attempts: u32,
        message: String,
    },

    /// Any client-side (4xx) failure other than rate limiting.
    #[error("request rejected with status {status}: {message}")]
    PermanentError { status: u16, message: String },

    /// A successful response whose body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Returns the HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimitExceeded { status, .. } | Self::PermanentError { status, .. } => {
                Some(*status)
            }
            Self::TransientServiceError { status, .. } => *status,
            Self::Decode(_) => None,
        }
    }

    /// Returns true for a permanent `404 Not Found`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PermanentError { status: 404, .. })
    }
}
