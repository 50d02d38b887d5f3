//! Error types for the provisioning engine.
//!
//! `EngineError` is the taxonomy surfaced to callers; `ClientError` covers
//! failures reported by the hosting platform API.

use guildforge_core::{ResourceId, ResourceKind, SessionKey};
use guildforge_store::SessionState;
use thiserror::Error;

use crate::rollback::RollbackSummary;

/// A result type using `EngineError`.
pub type Result<T> = std::result::Result<T, EngineError>;

/// A result type using `ClientError`.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors reported by a [`ResourceClient`](crate::client::ResourceClient).
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The resource does not exist on the platform.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind of the missing resource.
        kind: ResourceKind,
        /// Identifier of the missing resource.
        id: ResourceId,
    },

    /// The platform refused the call for lack of permission.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The platform returned an error response.
    #[error("platform API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the platform.
        message: String,
    },

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Returns true if the resource is already gone.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors that can occur while planning or executing a provisioning run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required capability is missing; nothing was mutated.
    #[error("prerequisite not met: {capability}")]
    Prerequisite {
        /// The exact missing capability.
        capability: String,
    },

    /// Two blueprint entries resolve to the same normalized name.
    #[error("blueprint conflict: {kind} entries {first:?} and {second:?} both normalize to {normalized:?}")]
    BlueprintConflict {
        /// Kind of the conflicting entries.
        kind: ResourceKind,
        /// The shared normalized name.
        normalized: String,
        /// First entry name.
        first: String,
        /// Second entry name.
        second: String,
    },

    /// The live resource listing could not be retrieved.
    #[error("live snapshot unavailable: {0}")]
    SnapshotUnavailable(#[source] ClientError),

    /// A mutating call failed.
    #[error("step {step} failed: {source}")]
    StepExecution {
        /// The failing step identifier.
        step: String,
        /// The underlying failure.
        #[source]
        source: ClientError,
    },

    /// A step failed and the session's rollback stack was unwound.
    #[error("provisioning failed at step {step}: {source}; {}", rollback.describe())]
    SetupOperation {
        /// The first failing step.
        step: String,
        /// The original failure.
        #[source]
        source: Box<EngineError>,
        /// What was and wasn't rolled back.
        rollback: RollbackSummary,
    },

    /// Compensating actions failed and resources remain on the platform.
    #[error("rollback for session {session} left {remaining} resource(s) in place")]
    RollbackPartialFailure {
        /// The session whose stack could not be fully unwound.
        session: SessionKey,
        /// Number of entries still on the stack.
        remaining: usize,
    },

    /// Resumption was attempted on a session past its expiry.
    #[error("session {0} has expired")]
    SessionExpired(SessionKey),

    /// Resources from completed steps disappeared while the session was
    /// suspended.
    #[error("session {session} drifted: completed step(s) {steps:?} no longer exist")]
    ResumeDrift {
        /// The session that could not be resumed.
        session: SessionKey,
        /// Completed steps whose resources are gone.
        steps: Vec<String>,
    },

    /// No session exists for the key.
    #[error("session not found: {0}")]
    SessionNotFound(SessionKey),

    /// The initiator already has a live session in this tenant.
    #[error("session {0} is already in progress")]
    SessionAlreadyActive(SessionKey),

    /// The requested session state transition is not valid.
    #[error("invalid state transition for session {key}: cannot transition from {from:?} to {to:?}")]
    InvalidState {
        /// The session being transitioned.
        key: SessionKey,
        /// The current state.
        from: SessionState,
        /// The requested target state.
        to: SessionState,
    },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] guildforge_store::StoreError),

    /// Platform API error outside of a plan step.
    #[error("platform error: {0}")]
    Client(#[from] ClientError),

    /// Invalid input such as a malformed blueprint.
    #[error(transparent)]
    Core(#[from] guildforge_core::CoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::SessionNotFound(_) => 404,
            Self::Prerequisite { .. } => 403,
            Self::BlueprintConflict { .. } | Self::Core(_) => 400,
            Self::SessionAlreadyActive(_) | Self::InvalidState { .. } | Self::ResumeDrift { .. } => 409,
            Self::SessionExpired(_) => 410,
            Self::SnapshotUnavailable(_) | Self::Client(_) => 502,
            Self::StepExecution { .. }
            | Self::SetupOperation { .. }
            | Self::RollbackPartialFailure { .. }
            | Self::Store(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    ///
    /// Step failures are not retriable: creates are non-idempotent on the
    /// platform side.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::SnapshotUnavailable(_) | Self::Store(_) | Self::Internal(_)
        )
    }

    /// Returns true if the error was raised before any mutation.
    #[must_use]
    pub const fn is_pre_mutation(&self) -> bool {
        matches!(
            self,
            Self::Prerequisite { .. }
                | Self::BlueprintConflict { .. }
                | Self::SnapshotUnavailable(_)
                | Self::SessionAlreadyActive(_)
        )
    }
}
