//! Domain error kinds.
//!
//! The split mirrors how failures propagate through the write path:
//! validation and not-found translate straight into caller rejections,
//! storage and embedding failures abort the current document only, and
//! vector-index failures are reported but never fail a write on their own.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KbError {
    /// Bad caller input. Never retried.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A lookup that found nothing. A normal outcome, not a fault.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The relational store failed. Fatal for the current operation.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// The embedding gateway failed or returned a malformed response.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The vector store failed. Non-fatal on the write path; callers
    /// surface it as a warning, not as operation failure.
    #[error("vector index error: {0}")]
    VectorIndex(String),
}

pub type Result<T> = std::result::Result<T, KbError>;

impl KbError {
    pub fn validation(msg: impl Into<String>) -> Self {
        KbError::Validation(msg.into())
    }
}
