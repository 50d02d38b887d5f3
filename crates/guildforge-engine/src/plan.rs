//! Reconciliation plans.

use std::collections::{BTreeMap, BTreeSet};

use guildforge_core::{ResourceId, ResourceKind, ResourceSpec};
use serde::Serialize;

use crate::client::LiveResource;

/// One step of a reconciliation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanAction {
    /// Create a resource from a blueprint entry.
    Create {
        /// The desired resource.
        spec: ResourceSpec,
    },
    /// Bring a matched live resource in line with its blueprint entry.
    Update {
        /// The live resource.
        id: ResourceId,
        /// The desired resource.
        spec: ResourceSpec,
        /// Attributes at planning time.
        current: LiveResource,
    },
    /// Re-parent a channel; `to: None` detaches it.
    Move {
        /// The channel.
        id: ResourceId,
        /// Live name, for reporting.
        name: String,
        /// Parent at planning time.
        from: Option<ResourceId>,
        /// New parent.
        to: Option<ResourceId>,
    },
    /// Delete an unmatched, unprotected live resource.
    Delete {
        /// The live resource.
        id: ResourceId,
        /// Its kind.
        kind: ResourceKind,
        /// Live name, for reporting.
        name: String,
        /// Parent at planning time (channels only).
        parent_id: Option<ResourceId>,
    },
}

impl PlanAction {
    /// Stable step identifier.
    ///
    /// Creates and updates are keyed by blueprint entry, so an entry keeps its
    /// identifier if it drifts from one to the other between attempts.
    #[must_use]
    pub fn step_id(&self) -> String {
        match self {
            Self::Create { spec } | Self::Update { spec, .. } => spec.identity(),
            Self::Move { id, .. } => format!("move:{id}"),
            Self::Delete { id, kind, .. } => format!("delete:{kind}:{id}"),
        }
    }

    /// Kind of resource the step mutates.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Create { spec } | Self::Update { spec, .. } => spec.kind(),
            Self::Move { .. } => ResourceKind::Channel,
            Self::Delete { kind, .. } => *kind,
        }
    }

    /// Short verb for logs and summaries.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Move { .. } => "move",
            Self::Delete { .. } => "delete",
        }
    }

    /// Human-readable name of the target.
    #[must_use]
    pub fn target_name(&self) -> &str {
        match self {
            Self::Create { spec } | Self::Update { spec, .. } => spec.name(),
            Self::Move { name, .. } | Self::Delete { name, .. } => name,
        }
    }
}

/// Ordered actions plus the categories that already exist.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationPlan {
    /// Actions in execution order.
    pub actions: Vec<PlanAction>,
    /// Blueprint category name to matched live category id.
    pub parents: BTreeMap<String, ResourceId>,
}

impl ReconciliationPlan {
    /// Returns true if live state already conforms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Step identifiers in execution order.
    #[must_use]
    pub fn step_ids(&self) -> Vec<String> {
        self.actions.iter().map(PlanAction::step_id).collect()
    }

    /// Find the action with a step identifier.
    #[must_use]
    pub fn find(&self, step_id: &str) -> Option<&PlanAction> {
        self.actions.iter().find(|a| a.step_id() == step_id)
    }

    /// Kinds the plan mutates.
    #[must_use]
    pub fn mutating_kinds(&self) -> BTreeSet<ResourceKind> {
        self.actions.iter().map(PlanAction::kind).collect()
    }

    /// Counts per verb, e.g. `"2 create, 1 delete"`.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.actions.is_empty() {
            return "no changes".to_string();
        }
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for action in &self.actions {
            *counts.entry(action.verb()).or_default() += 1;
        }
        counts
            .iter()
            .map(|(verb, n)| format!("{n} {verb}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
