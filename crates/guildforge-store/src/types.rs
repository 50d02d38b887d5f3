//! Domain types stored in the database.
//!
//! These types represent the persisted state of provisioning wizards and of
//! the panels they deployed.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use guildforge_core::{
    Blueprint, ResourceAttributes, ResourceId, ResourceKind, SessionKey, TenantId,
};
use serde::{Deserialize, Serialize};

/// A provisioning wizard record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WizardSession {
    /// Unique key: one live session per initiator per tenant.
    pub key: SessionKey,
    /// Current lifecycle state.
    pub state: SessionState,
    /// The blueprint (or subset) this session provisions.
    pub blueprint: Blueprint,
    /// Channel the wizard was started from; it hosts progress output.
    #[serde(default)]
    pub origin_channel: Option<ResourceId>,
    /// Step identifiers in execution order.
    pub ordered_steps: Vec<String>,
    /// Index of the next step to execute.
    ///
    /// A failed step is retried without being marked complete, so this is
    /// never derived from `completed_steps`.
    pub current_index: usize,
    /// Steps that finished successfully.
    pub completed_steps: BTreeSet<String>,
    /// Compensating actions for mutations made by this session, oldest first.
    pub rollback_stack: Vec<RollbackEntry>,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
    /// Last time progress was written.
    pub updated_at: DateTime<Utc>,
    /// Hard expiry for resumption.
    pub expires_at: DateTime<Utc>,
    /// Last step failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Lifecycle states for a wizard session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    /// Recorded but no step has run yet.
    Created = 1,
    /// Steps are executing (or the process stopped mid-run).
    InProgress = 2,
    /// All steps finished.
    Completed = 3,
    /// A step failed and the rollback stack was unwound.
    Aborted = 4,
    /// Abandoned past its inactivity threshold or expiry.
    Expired = 5,
}

impl SessionState {
    /// Convert the state to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to a `SessionState`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Created),
            2 => Some(Self::InProgress),
            3 => Some(Self::Completed),
            4 => Some(Self::Aborted),
            5 => Some(Self::Expired),
            _ => None,
        }
    }
}

/// The mutation a rollback entry compensates for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackOperation {
    /// A resource was created; compensate by deleting it.
    ResourceCreated,
    /// A resource was updated; compensate by restoring `prior`.
    ResourceUpdated,
    /// A delete was issued but not yet confirmed.
    ///
    /// Deletions are never undone, so this only records that the outcome of
    /// the call is unknown.
    ResourceDeletePending,
}

/// One compensating action on a session's rollback stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackEntry {
    /// What was done.
    pub operation: RollbackOperation,
    /// Kind of the affected resource.
    pub resource_kind: ResourceKind,
    /// The affected resource; `None` only while a creation is unconfirmed.
    pub resource_id: Option<ResourceId>,
    /// Parents the resource lived under when the entry was recorded.
    #[serde(default)]
    pub parent_context_ids: Vec<ResourceId>,
    /// Session that owns the entry.
    pub owner: SessionKey,
    /// Plan step that produced the entry.
    pub step_id: String,
    /// Attributes before the update (`ResourceUpdated` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<ResourceAttributes>,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
}

/// A category deployed by a completed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedPanel {
    /// Tenant the panel lives in.
    pub tenant_id: TenantId,
    /// The category resource backing the panel.
    pub resource_id: ResourceId,
    /// Panel (category) name from the blueprint.
    pub name: String,
    /// Session that deployed it.
    pub deployed_by: SessionKey,
    /// When it was recorded.
    pub deployed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_roundtrip() {
        for state in [
            SessionState::Created,
            SessionState::InProgress,
            SessionState::Completed,
            SessionState::Aborted,
            SessionState::Expired,
        ] {
            assert_eq!(SessionState::from_u8(state.as_u8()), Some(state));
        }
        assert_eq!(SessionState::from_u8(0), None);
        assert_eq!(SessionState::from_u8(6), None);
    }
}
