//! Index error types.

use thiserror::Error;

/// Errors raised by the HNSW index and its persistence layer.
#[derive(Error, Debug)]
pub enum IndexError {
    /// A vector's length differs from the index dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A persisted graph is corrupt, truncated, or does not match the
    /// vectors supplied at load time.
    #[error("invalid graph format: {0}")]
    Format(String),

    /// A mutation overlapped another operation on an index built with
    /// `thread_safe = false`.
    #[error("concurrent access to a single-threaded index")]
    ConcurrencyViolation,

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;
