//! Common error types for guildforge.
//!
//! This module provides shared error types that are used across multiple crates.

use crate::ids::SessionKey;
use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the guildforge system.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A wizard session with the specified key was not found.
    #[error("session not found: {0}")]
    SessionNotFound(SessionKey),

    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// A blueprint document could not be accepted.
    #[error("invalid blueprint: {0}")]
    InvalidBlueprint(String),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}
