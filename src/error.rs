use std::time::Duration;
use thiserror::Error;

/// Crate-wide error type, categorised for the retry layer
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (permanent failures)
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // I/O errors (potentially transient)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors (usually permanent)
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // Network errors (transient - should retry)
    #[error("Network error from {source_name}: {message}")]
    Network {
        source_name: String,
        message: String,
    },

    #[error("Rate limit exceeded: retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Option<Duration> },

    // Client errors (permanent - don't retry)
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    // Server errors (transient - should retry)
    #[error("Service temporarily unavailable: {service} - {reason}")]
    ServiceUnavailable { service: String, reason: String },

    #[error("Timeout error: operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    // Parse errors
    #[error("Parse error in {context}: {message}")]
    Parse { context: String, message: String },

    /// The provider rejected the page size; the caller should shrink it
    #[error("Page too large for {source_name}: {requested} records requested")]
    PageTooLarge { source_name: String, requested: u32 },

    // Provider errors
    #[error("Provider error: {0}")]
    Provider(String),
}

/// Error categorization for retry strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Permanent errors - should not retry
    Permanent,
    /// Transient errors - safe to retry
    Transient,
    /// Rate limited - retry with backoff
    RateLimited,
}

impl Error {
    /// Categorize error for retry logic
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_)
            | Self::InvalidInput { .. }
            | Self::AuthenticationFailed(_)
            | Self::Parse { .. }
            | Self::Serde(_)
            | Self::PageTooLarge { .. }
            | Self::Provider(_) => ErrorCategory::Permanent,

            Self::RateLimitExceeded { .. } => ErrorCategory::RateLimited,

            Self::Network { .. }
            | Self::ServiceUnavailable { .. }
            | Self::Timeout { .. }
            | Self::Io(_) => ErrorCategory::Transient,
        }
    }

    /// Check if error is retryable
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::RateLimited
        )
    }

    /// Get suggested retry delay for rate limited errors
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after } => *retry_after,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<crate::sources::ProviderError> for Error {
    fn from(err: crate::sources::ProviderError) -> Self {
        use crate::sources::ProviderError;

        match err {
            ProviderError::Network { source_name, message } => Self::Network {
                source_name,
                message,
            },
            ProviderError::Parse(msg) => Self::Parse {
                context: "provider".to_string(),
                message: msg,
            },
            ProviderError::RateLimit { retry_after } => Self::RateLimitExceeded { retry_after },
            ProviderError::Auth(msg) => Self::AuthenticationFailed(msg),
            ProviderError::InvalidQuery(msg) => Self::InvalidInput {
                field: "query".to_string(),
                reason: msg,
            },
            ProviderError::ServiceUnavailable { source_name, reason } => {
                Self::ServiceUnavailable {
                    service: source_name,
                    reason,
                }
            }
            ProviderError::PageTooLarge {
                source_name,
                requested,
            } => Self::PageTooLarge {
                source_name,
                requested,
            },
            ProviderError::Timeout(timeout) => Self::Timeout { timeout },
            ProviderError::Other(msg) => Self::Provider(msg),
        }
    }
}
