//! Error types for the Kindred domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether a retry of the same request may succeed.
    ///
    /// Connection failures and any non-2xx answer count as transient; a
    /// provider that was never configured does not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::NotConfigured(_))
    }
}

/// Reasons a chat turn is rejected before any pipeline work happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    #[error("{0}")]
    Validation(String),

    #[error("Free message limit reached ({count}/{limit})")]
    QuotaExceeded { count: u64, limit: u64 },
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = ProviderError::ApiError {
            status_code: 500,
            message: "upstream exploded".into(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[test]
    fn server_errors_are_transient() {
        let err = ProviderError::ApiError {
            status_code: 503,
            message: String::new(),
        };
        assert!(err.is_transient());
        assert!(ProviderError::Network("reset".into()).is_transient());
        assert!(!ProviderError::NotConfigured("none".into()).is_transient());
    }

    #[test]
    fn quota_error_mentions_limit() {
        let err = TurnError::QuotaExceeded { count: 20, limit: 20 };
        assert_eq!(err.to_string(), "Free message limit reached (20/20)");
    }
}
