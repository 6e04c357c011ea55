//! Error types shared across ItemLink crates.

use thiserror::Error;

/// Result type for ItemLink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported to callers of relay operations.
///
/// The relay loops themselves never surface errors; these only come back from
/// the enqueue/deliver interfaces, construction, and operations on a relay
/// that has been shut down.
#[derive(Debug, Error)]
pub enum Error {
    /// A bounded queue was at capacity and the caller did not block.
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// The relay has been shut down.
    #[error("Relay closed: {0}")]
    RelayClosed(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Message could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::QueueFull(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::QueueFull("outbound queue of door-1".to_string());
        assert_eq!(err.to_string(), "Queue full: outbound queue of door-1");
        assert!(err.is_retryable());
        assert!(!Error::RelayClosed("door-1".to_string()).is_retryable());
    }
}
