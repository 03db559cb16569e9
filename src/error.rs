/// Unified error types for the Nick Hider engine
use std::time::Duration;
use thiserror::Error;

/// Crate-level error type for construction, configuration and IO
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Privacy configuration failed validation
    #[error("Invalid privacy config: {0}")]
    InvalidPrivacyConfig(String),

    /// HTTP client construction errors
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Texture storage errors
    #[error("Texture storage error: {0}")]
    TextureStorage(String),

    /// Background worker is gone
    #[error("Fetch worker unavailable")]
    WorkerUnavailable,

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Classification of a failed fetch pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    RateLimit,
    NotFound,
    Network,
    Internal,
    Interrupted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RateLimit => "rate_limit",
            FailureKind::NotFound => "not_found",
            FailureKind::Network => "network",
            FailureKind::Internal => "internal",
            FailureKind::Interrupted => "interrupted",
        }
    }
}

/// Failure of one fetch pipeline attempt
///
/// Never crosses the pipeline boundary: the resolution service folds it into
/// per-source state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Remote is throttling us
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Remote has no such identity
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport, timeout or connection reset
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed response, unexpected status or local invariant violation
    #[error("Internal error: {0}")]
    Internal(String),

    /// Backoff wait was interrupted
    #[error("Interrupted during wait")]
    Interrupted,
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::RateLimited { .. } => FailureKind::RateLimit,
            FetchError::NotFound(_) => FailureKind::NotFound,
            FetchError::Network(_) => FailureKind::Network,
            FetchError::Internal(_) => FailureKind::Internal,
            FetchError::Interrupted => FailureKind::Interrupted,
        }
    }

    /// Whether another attempt inside the same fetch can help
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. } | FetchError::Network(_)
        )
    }

    /// Short stable code used in log lines
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::RateLimited { .. } => "NH-429",
            FetchError::NotFound(_) => "NH-404",
            FetchError::Network(_) => "NH-NET",
            FetchError::Internal(_) => "NH-INT",
            FetchError::Interrupted => "NH-INTR",
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Identity of this failure for log throttling
    pub fn signature(&self) -> String {
        format!("{}:{}", self.code(), self)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            FetchError::Network(e.to_string())
        } else if e.is_decode() {
            FetchError::Internal(format!("Malformed response: {}", e))
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::RateLimited { retry_after: None }.is_retryable());
        assert!(FetchError::Network("reset".to_string()).is_retryable());
        assert!(!FetchError::NotFound("alice".to_string()).is_retryable());
        assert!(!FetchError::Internal("bad json".to_string()).is_retryable());
        assert!(!FetchError::Interrupted.is_retryable());
    }

    #[test]
    fn test_signature_distinguishes_detail() {
        let a = FetchError::Network("timeout".to_string());
        let b = FetchError::Network("reset".to_string());
        assert_ne!(a.signature(), b.signature());
        assert_eq!(a.signature(), a.clone().signature());
        assert!(a.signature().starts_with("NH-NET"));
    }
}
