//! Error types for sentinel-core.

use thiserror::Error;

/// Result type alias using sentinel-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Operation exceeded its deadline
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// LLM provider call failed
    #[error("LLM error: {provider} - {message}")]
    Llm { provider: String, message: String },

    /// External service failed after retries were exhausted
    #[error("Service '{service}' failed: {message}")]
    Service { service: String, message: String },

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Input violated a pipeline invariant
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A concurrent writer already produced the row
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Crawler bridge rejected or failed a fetch
    #[error("Crawler error: {0}")]
    Crawler(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an LLM provider error.
    pub fn llm(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Llm {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a service failure error.
    pub fn service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error for an entity kind and id.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// True when the error is worth retrying through the resilience layer.
    ///
    /// Validation, not-found and conflict errors are domain outcomes; a
    /// retry cannot change them.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            Self::Validation(_) | Self::NotFound { .. } | Self::Conflict(_) | Self::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("target", "t-123");
        assert_eq!(err.to_string(), "target not found: t-123");
    }

    #[test]
    fn test_retriable_classification() {
        assert!(Error::timeout(500).is_retriable());
        assert!(Error::llm("local", "boom").is_retriable());
        assert!(Error::storage("disk").is_retriable());
        assert!(!Error::validation("bad symbol").is_retriable());
        assert!(!Error::not_found("article", "a-1").is_retriable());
        assert!(!Error::conflict("already active").is_retriable());
    }
}
