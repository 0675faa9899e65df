//! Core primitives shared by nodeflow storage backends.

/// The common backend error.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Utility type alias for backend results.
pub type BackendResult<T> = Result<T, BackendError>;
