//! Error handling for the retrieval engine

use thiserror::Error;

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Classification used by the retry policy and HTTP mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller fault; never retried
    InvalidInput,
    /// Missing document/entity; empty or 404-equivalent
    NotFound,
    /// Per-operation deadline exceeded
    Timeout,
    /// Store or collaborator unavailable; retried with backoff
    TransientDependency,
    /// Authentication or schema error; surfaced immediately
    PermanentDependency,
    /// Invariant violation; abort without corrupting stores
    DataIntegrity,
    /// Anything else
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransientDependency => "transient_dependency",
            ErrorKind::PermanentDependency => "permanent_dependency",
            ErrorKind::DataIntegrity => "data_integrity",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("deadline exceeded in {operation} after {deadline_ms}ms")]
    Timeout { operation: String, deadline_ms: u64 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("data integrity: {0}")]
    DataIntegrity(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Errors from the graph and vector store adapters
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store not initialized")]
    NotInitialized,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// Errors from external collaborators (embedder, NER, LLM)
#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("timeout: {0} took too long")]
    Timeout(String),

    #[error("unauthorized: check api key")]
    Unauthorized,

    #[error("rate limited")]
    RateLimited,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("collaborator disabled: {0}")]
    Disabled(String),
}

impl EngineError {
    /// Deadline helper used by timeout wrappers
    pub fn timeout(operation: impl Into<String>, deadline_ms: u64) -> Self {
        EngineError::Timeout {
            operation: operation.into(),
            deadline_ms,
        }
    }

    /// Map to the error-kind taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::Store(StoreError::InvalidDimension { .. }) => ErrorKind::DataIntegrity,
            EngineError::Store(StoreError::NotInitialized) => ErrorKind::PermanentDependency,
            EngineError::Store(_) => ErrorKind::TransientDependency,
            EngineError::Collaborator(CollaboratorError::Unauthorized) => {
                ErrorKind::PermanentDependency
            }
            EngineError::Collaborator(CollaboratorError::Disabled(_)) => {
                ErrorKind::PermanentDependency
            }
            EngineError::Collaborator(CollaboratorError::Timeout(_)) => ErrorKind::Timeout,
            EngineError::Collaborator(_) => ErrorKind::TransientDependency,
            EngineError::DataIntegrity(_) => ErrorKind::DataIntegrity,
            EngineError::Database(_) => ErrorKind::TransientDependency,
            _ => ErrorKind::Internal,
        }
    }

    /// Check if the error is retryable at the adapter level
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::TransientDependency
        )
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::NotFound(_) => "not_found",
            EngineError::Timeout { .. } => "timeout",
            EngineError::Store(_) => "store",
            EngineError::Collaborator(_) => "collaborator",
            EngineError::DataIntegrity(_) => "data_integrity",
            EngineError::Config(_) => "config",
            EngineError::Io(_) => "io",
            EngineError::Serialization(_) => "serialization",
            EngineError::Database(_) => "database",
            EngineError::Generic(_) => "generic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let timeout = EngineError::timeout("extract", 30_000);
        assert!(timeout.is_retryable());

        let unavailable = EngineError::Store(StoreError::Unavailable("down".to_string()));
        assert!(unavailable.is_retryable());

        let invalid = EngineError::InvalidInput("bad filter".to_string());
        assert!(!invalid.is_retryable());

        let unauthorized = EngineError::Collaborator(CollaboratorError::Unauthorized);
        assert!(!unauthorized.is_retryable());
    }

    #[test]
    fn test_error_kinds() {
        let dim = EngineError::Store(StoreError::InvalidDimension {
            expected: 384,
            actual: 768,
        });
        assert_eq!(dim.kind(), ErrorKind::DataIntegrity);

        let missing = EngineError::NotFound("doc.txt".to_string());
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert_eq!(missing.kind().as_str(), "not_found");
    }

    #[test]
    fn test_error_category() {
        let err = EngineError::Collaborator(CollaboratorError::RateLimited);
        assert_eq!(err.category(), "collaborator");
        assert_eq!(err.kind(), ErrorKind::TransientDependency);
    }
}
