use thiserror::Error;

/// Errors raised while validating or resolving coordination messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Invalid message type: {0}")]
    InvalidType(String),

    #[error("sender identity must not be empty or \"unknown\"")]
    InvalidSender,

    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),

    #[error("limit must be between 1 and {max}, got {got}")]
    LimitOutOfRange { got: i64, max: i64 },
}

/// Errors surfaced by a [`crate::kv::KvStore`] implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("key-value backend error: {0}")]
    Backend(String),

    #[error("key-value backend timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl BackendError {
    pub fn backend(msg: impl Into<String>) -> Self {
        BackendError::Backend(msg.into())
    }
}
