use std::time::Duration;

/// Errors surfaced by the store, lock, progress and traversal layers.
#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    /// Malformed upload or undecodable stored value.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A document id or position that is not in the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// Lock acquisition or a bounded scan ran past the operation deadline.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// A lock token vanished while its guard was still alive.
    #[error("lock release failed: {0}")]
    LockReleaseFailure(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl AnnotateError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Transient failures the caller may retry as a whole.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, AnnotateError>;
