//! Error types for codec operations

use thiserror::Error;

/// Errors that can occur during encoding or decoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A function parameter was invalid
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// Platform is unsupported (field arithmetic self-test failed)
    #[error("platform unsupported: GF(2^8) self-test failed")]
    Platform,

    /// An allocation failed
    #[error("out of memory")]
    OutOfMemory,

    /// More data is needed for this operation to succeed
    #[error("need more data")]
    NeedMoreData,

    /// Unexpected internal error
    #[error("unexpected internal error")]
    Unexpected,
}

/// Type alias for Result with codec Error
pub type Result<T> = std::result::Result<T, Error>;
