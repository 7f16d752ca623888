use thiserror::Error;

/// Top-level error type for wagate.
#[derive(Debug, Error)]
pub enum WagateError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Database/storage error.
    #[error("store error: {0}")]
    Store(String),

    /// Error from a WhatsApp session (not connected, send failed, pairing failed).
    #[error("session error: {0}")]
    Session(String),

    /// A referenced record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Rejected input.
    #[error("{0}")]
    Validation(String),

    /// Uniqueness or state conflict.
    #[error("{0}")]
    Conflict(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
