//! Wizard session state machine.
//!
//! # State Machine
//!
//! ```text
//!     ┌─────────┐  (first step)   ┌────────────┐  (all steps)  ┌───────────┐
//!     │ Created │────────────────▶│ InProgress │──────────────▶│ Completed │
//!     └────┬────┘                 └─────┬──────┘               └───────────┘
//!          │                            │ (step failed)
//!          │                            ▼
//!          │                      ┌───────────┐
//!          ├─────────────────────▶│  Aborted  │
//!          │                      └─────┬─────┘
//!          │ (abandoned)                │ (cleanup)
//!          ▼                            ▼
//!     ┌──────────────────────────────────────┐
//!     │               Expired                │◀── InProgress (abandoned)
//!     └──────────────────────────────────────┘
//! ```

use guildforge_core::SessionKey;
use guildforge_store::SessionState;

use crate::error::{EngineError, Result};

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `EngineError::InvalidState` if the transition is not allowed.
pub fn validate_transition(
    key: &SessionKey,
    from: SessionState,
    to: SessionState,
) -> Result<SessionState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(EngineError::InvalidState {
            key: *key,
            from,
            to,
        })
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::{Aborted, Completed, Created, Expired, InProgress};

    matches!(
        (from, to),
        (Created, InProgress | Aborted | Expired)
            | (InProgress, Completed | Aborted | Expired)
            // Cleanup retires aborted sessions once their stack is unwound
            | (Aborted, Expired)
    )
}

/// Returns the list of valid target states from the given state.
#[must_use]
pub fn valid_transitions_from(state: SessionState) -> Vec<SessionState> {
    use SessionState::{Aborted, Completed, Created, Expired, InProgress};

    match state {
        Created => vec![InProgress, Aborted, Expired],
        InProgress => vec![Completed, Aborted, Expired],
        Aborted => vec![Expired],
        Completed | Expired => vec![],
    }
}

/// Returns true if no further transition is possible.
#[must_use]
pub const fn is_terminal(state: SessionState) -> bool {
    matches!(state, SessionState::Completed | SessionState::Expired)
}

/// Returns true if the session may still run steps.
#[must_use]
pub const fn is_resumable(state: SessionState) -> bool {
    matches!(state, SessionState::Created | SessionState::InProgress)
}
