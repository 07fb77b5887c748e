//! Error taxonomy shared by the façade, the stores, and the remote client.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LoreError>;

/// All failures the library surfaces to callers.
///
/// Validation and not-found errors are caller mistakes and are never worth
/// retrying. `RateLimited` is recoverable after the hinted delay.
/// `Connection` failures from mutating remote calls leave the outcome
/// indeterminate — the client does not retry them.
#[derive(Debug, Error)]
pub enum LoreError {
    /// Bad input: empty required field, confidence out of range, wrong
    /// embedding dimension, malformed id.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The targeted lesson does not exist (or is out of the key's scope).
    #[error("lesson not found: {0}")]
    LessonNotFound(String),

    /// The server rejected the API key (401/403).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server throttled the request; retry after the hinted delay.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Network-level failure or timeout talking to a remote store.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stored data violates an invariant (corrupt blob, dimension
    /// mismatch, unparseable timestamp). Never auto-repaired.
    #[error("data integrity: {0}")]
    Integrity(String),

    /// Unexpected response from the remote server (non-2xx outside the
    /// mapped statuses, or a body that fails to deserialize).
    #[error("server error: {0}")]
    Remote(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoreError {
    /// Shorthand for a validation failure.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
