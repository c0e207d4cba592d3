//! Coordinator error types

use thiserror::Error;

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Coordinator errors
#[derive(Debug, Error)]
pub enum CoordinatorError {
    // ==================== Lifecycle Errors ====================
    #[error("coordinator not bootstrapped yet, wait a moment")]
    NotBootstrapped,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ==================== Changefeed Errors ====================
    #[error("changefeed not found: {0}")]
    ChangefeedNotFound(String),

    #[error("changefeed already exists: {0}")]
    ChangefeedAlreadyExists(String),

    #[error("changefeed is in scheduling: {0}")]
    InScheduling(String),

    // ==================== Backend Errors ====================
    #[error("metadata backend error: {0}")]
    Backend(String),

    // ==================== Transport Errors ====================
    #[error("transport send failed: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    // ==================== Internal Errors ====================
    #[error("invariant violated: {0}")]
    FatalInvariant(String),

    #[error("channel closed")]
    ChannelClosed,
}

impl CoordinatorError {
    /// Check if this error is retriable by the caller
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::NotBootstrapped
                | CoordinatorError::InScheduling(_)
                | CoordinatorError::Backend(_)
                | CoordinatorError::Transport(_)
        )
    }

    /// Check if this is a fatal error requiring process restart
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoordinatorError::FatalInvariant(_))
    }
}

// Conversion from channel errors
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CoordinatorError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        CoordinatorError::ChannelClosed
    }
}

impl From<postcard::Error> for CoordinatorError {
    fn from(e: postcard::Error) -> Self {
        CoordinatorError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_errors() {
        assert!(CoordinatorError::NotBootstrapped.is_retriable());
        assert!(CoordinatorError::Backend("etcd down".into()).is_retriable());
        assert!(!CoordinatorError::ChangefeedNotFound("cf".into()).is_retriable());
        assert!(!CoordinatorError::FatalInvariant("dup".into()).is_retriable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(CoordinatorError::FatalInvariant("maintainer runs on two nodes".into()).is_fatal());
        assert!(!CoordinatorError::Transport("peer gone".into()).is_fatal());
    }
}
