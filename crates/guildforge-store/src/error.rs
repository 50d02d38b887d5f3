//! Error types for session and panel storage.

use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by a [`Store`](crate::Store).
#[derive(Debug, Error)]
pub enum StoreError {
    /// No session or panel record exists under the key.
    #[error("record not found")]
    NotFound,

    /// `RocksDB` rejected the read or write.
    #[error("database error: {0}")]
    Database(String),

    /// A record could not be encoded to or decoded from CBOR.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored key could not be decoded.
    #[error("corrupt key: {0}")]
    CorruptKey(String),
}
