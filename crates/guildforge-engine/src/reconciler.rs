//! Diffing a blueprint against live state.
//!
//! The reconciler is pure: it never calls the platform. The caller captures a
//! [`LiveSnapshot`] and computes the [`ProtectedResourceSet`] first.

use std::collections::{BTreeMap, HashMap, HashSet};

use guildforge_core::{Blueprint, ResourceId, ResourceKind, ResourceSpec};

use crate::client::LiveResource;
use crate::error::{EngineError, Result};
use crate::matching::{match_resources, normalize, MatchRequest};
use crate::plan::{PlanAction, ReconciliationPlan};
use crate::snapshot::{LiveSnapshot, ProtectedResourceSet};

/// Produces reconciliation plans.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler;

impl Reconciler {
    /// Plan the actions that bring `snapshot` in line with `blueprint`.
    ///
    /// Actions are ordered: channel deletes, channel detaches, category
    /// deletes, role deletes, then role, category and channel creates and
    /// updates by position. Protected resources are never matched and never
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BlueprintConflict` if two entries of one kind
    /// (channels: of one category) normalize to the same name.
    pub fn plan(
        blueprint: &Blueprint,
        snapshot: &LiveSnapshot,
        protected: &ProtectedResourceSet,
    ) -> Result<ReconciliationPlan> {
        check_conflicts(blueprint)?;

        let specs = blueprint.specs();
        let of_kind = |kind: ResourceKind| -> Vec<&ResourceSpec> {
            specs.iter().filter(|s| s.kind() == kind).collect()
        };
        let role_specs = of_kind(ResourceKind::Role);
        let category_specs = of_kind(ResourceKind::Category);
        let channel_specs = of_kind(ResourceKind::Channel);

        let candidates = |kind: ResourceKind| -> Vec<&LiveResource> {
            snapshot
                .of_kind(kind)
                .iter()
                .filter(|r| !protected.contains(r.id))
                .collect()
        };

        // Roles and categories
        let roles = pair(&role_specs, candidates(ResourceKind::Role), |_| None);
        let categories = pair(&category_specs, candidates(ResourceKind::Category), |_| None);

        let parents: BTreeMap<String, ResourceId> = categories
            .matched
            .iter()
            .map(|(spec, live)| (spec.name().to_string(), live.id))
            .collect();

        // Channels prefer candidates under their matched category
        let channels = pair(&channel_specs, candidates(ResourceKind::Channel), |spec| {
            spec.parent_ref().and_then(|c| parents.get(c).copied())
        });

        let deleted_categories: HashSet<ResourceId> =
            categories.unmatched.iter().map(|c| c.id).collect();

        let mut actions = Vec::new();

        for channel in &channels.unmatched {
            actions.push(delete(channel));
        }
        for (_, live) in &channels.matched {
            if let Some(parent) = live.parent_id.filter(|p| deleted_categories.contains(p)) {
                actions.push(PlanAction::Move {
                    id: live.id,
                    name: live.name.clone(),
                    from: Some(parent),
                    to: None,
                });
            }
        }
        for category in &categories.unmatched {
            actions.push(delete(category));
        }
        for role in &roles.unmatched {
            actions.push(delete(role));
        }

        for spec in &role_specs {
            actions.extend(converge(spec, roles.live_for(spec), None));
        }
        for spec in &category_specs {
            actions.extend(converge(spec, categories.live_for(spec), None));
        }
        for spec in &channel_specs {
            let parent = spec.parent_ref().and_then(|c| parents.get(c).copied());
            let desired_parent = ParentTarget::from_lookup(parent);
            actions.extend(converge(spec, channels.live_for(spec), Some(desired_parent)));
        }

        tracing::debug!(
            actions = actions.len(),
            protected = protected.len(),
            "Planned reconciliation"
        );

        Ok(ReconciliationPlan { actions, parents })
    }
}

/// Where a channel should end up.
#[derive(Debug, Clone, Copy)]
enum ParentTarget {
    /// Under an existing category.
    Existing(ResourceId),
    /// Under a category this plan creates.
    Pending,
}

impl ParentTarget {
    fn from_lookup(found: Option<ResourceId>) -> Self {
        found.map_or(Self::Pending, Self::Existing)
    }
}

struct Pairing<'s, 'l> {
    matched: Vec<(&'s ResourceSpec, &'l LiveResource)>,
    unmatched: Vec<&'l LiveResource>,
}

impl<'l> Pairing<'_, 'l> {
    fn live_for(&self, spec: &ResourceSpec) -> Option<&'l LiveResource> {
        self.matched
            .iter()
            .find(|(s, _)| s.identity() == spec.identity())
            .map(|(_, live)| *live)
    }
}

fn pair<'s, 'l>(
    specs: &[&'s ResourceSpec],
    candidates: Vec<&'l LiveResource>,
    preferred_parent: impl Fn(&ResourceSpec) -> Option<ResourceId>,
) -> Pairing<'s, 'l> {
    let requests: Vec<MatchRequest<'_>> = specs
        .iter()
        .map(|spec| MatchRequest {
            name: spec.name(),
            preferred_parent: preferred_parent(spec),
        })
        .collect();

    let outcome = match_resources(&requests, candidates);

    for (spec, found) in specs.iter().zip(&outcome.matches) {
        if let Some(found) = found {
            tracing::trace!(
                entry = %spec.identity(),
                live = %found.resource.id,
                rule = ?found.rule,
                "Matched live resource"
            );
        }
    }

    Pairing {
        matched: specs
            .iter()
            .zip(outcome.matches)
            .filter_map(|(spec, found)| found.map(|m| (*spec, m.resource)))
            .collect(),
        unmatched: outcome.unmatched,
    }
}

fn delete(live: &LiveResource) -> PlanAction {
    PlanAction::Delete {
        id: live.id,
        kind: live.kind,
        name: live.name.clone(),
        parent_id: live.parent_id,
    }
}

/// Create the entry, or update its match if anything it specifies differs.
///
/// A missing permission template in the blueprint expresses no opinion.
fn converge(
    spec: &ResourceSpec,
    live: Option<&LiveResource>,
    parent: Option<ParentTarget>,
) -> Option<PlanAction> {
    let Some(live) = live else {
        return Some(PlanAction::Create { spec: spec.clone() });
    };

    let position_differs = live.position != spec.position();
    let template_differs = spec
        .permission_template()
        .is_some_and(|t| live.permission_template.as_deref() != Some(t));
    let parent_differs = match parent {
        None => false,
        Some(ParentTarget::Existing(id)) => live.parent_id != Some(id),
        Some(ParentTarget::Pending) => true,
    };

    (position_differs || template_differs || parent_differs).then(|| PlanAction::Update {
        id: live.id,
        spec: spec.clone(),
        current: live.clone(),
    })
}

fn conflict_key(name: &str) -> String {
    let normalized = normalize(name);
    if normalized.is_empty() {
        name.to_string()
    } else {
        normalized
    }
}

fn check_unique<'a>(kind: ResourceKind, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for name in names {
        let key = conflict_key(name);
        if let Some(first) = seen.get(&key) {
            return Err(EngineError::BlueprintConflict {
                kind,
                normalized: key,
                first: (*first).to_string(),
                second: name.to_string(),
            });
        }
        seen.insert(key, name);
    }
    Ok(())
}

fn check_conflicts(blueprint: &Blueprint) -> Result<()> {
    check_unique(
        ResourceKind::Role,
        blueprint.roles.iter().map(|r| r.name.as_str()),
    )?;
    check_unique(
        ResourceKind::Category,
        blueprint.categories.iter().map(|c| c.name.as_str()),
    )?;
    for category in &blueprint.categories {
        check_unique(
            ResourceKind::Channel,
            category.channels.iter().map(|c| c.name.as_str()),
        )?;
    }
    Ok(())
}
