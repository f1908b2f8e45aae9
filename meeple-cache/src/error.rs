//! Error types for cache operations
//!
//! Most of these never reach callers of the request path: the cache is
//! fail-open, so backend, serialization and stats-store errors are logged
//! and converted into a miss or a no-op. [`Cancelled`] is the one signal
//! that does propagate.

use thiserror::Error;

/// Main error type for cache, backend and stats-store operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Connection error - network or connection pool issues
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Key-value backend command failed
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Durable store query failed
    #[error("Query error: {0}")]
    QueryError(String),

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    TimeoutError { timeout_ms: u64, context: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The external generation pipeline failed
    #[error("Generation error: {0}")]
    GenerationError(String),

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// Redis driver error (wrapper)
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Neo4rs driver error (wrapper)
    #[error("Neo4rs driver error: {0}")]
    DriverError(#[from] neo4rs::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl CacheError {
    /// Whether this error is the caller's cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled)
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Cancellation observed while serving a request.
///
/// Fail-open operations return this instead of [`CacheError`] so that the
/// only error a caller can see is the one it asked for.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Request cancelled")]
pub struct Cancelled;

impl From<Cancelled> for CacheError {
    fn from(_: Cancelled) -> Self {
        CacheError::Cancelled
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CacheError::BackendError("GET failed".to_string());
        assert_eq!(error.to_string(), "Backend error: GET failed");

        let timeout_error = CacheError::TimeoutError {
            timeout_ms: 2000,
            context: "cache get".to_string(),
        };
        assert!(timeout_error.to_string().contains("timed out after 2000ms"));
        assert!(timeout_error.to_string().contains("cache get"));
    }

    #[test]
    fn test_cancelled_conversion() {
        let error: CacheError = Cancelled.into();
        assert!(error.is_cancelled());
        assert!(!CacheError::Other("x".into()).is_cancelled());
    }

    #[test]
    fn test_error_conversion() {
        let error: CacheError = "test error".into();
        assert!(matches!(error, CacheError::Other(_)));

        let bad_json = serde_json::from_str::<serde_json::Value>("{not json");
        let error: CacheError = bad_json.unwrap_err().into();
        assert!(matches!(error, CacheError::SerializationError(_)));
    }
}
