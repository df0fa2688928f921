//! Error types for the remote persistence boundary.

use thiserror::Error;

/// Errors returned by a [`RemoteStore`](crate::RemoteStore).
///
/// The engine only cares about one distinction: can the call be retried
/// ([`RemoteError::is_transient`]) or must it be abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Network failure, 5xx, connection reset...
    #[error("Transient remote error: {0}")]
    Transient(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// The store rejected the payload or a precondition
    #[error("Validation error: {0}")]
    Validation(String),

    /// Row could not be encoded/decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RemoteError {
    /// Creates a transient error.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Creates a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::transient("reset").is_transient());
        assert!(RemoteError::Timeout(5000).is_transient());
        assert!(!RemoteError::validation("bad status").is_transient());
        assert!(!RemoteError::Serialization("eof".into()).is_transient());
    }
}
