//! Name matching between blueprint entries and live resources.
//!
//! Live names often carry decoration (emoji prefixes, separators, casing) that
//! the blueprint doesn't. Matching tries the most specific rule first across
//! every entry before falling back to a looser one, so a loose match never
//! steals a resource that another entry matches exactly.

use guildforge_core::ResourceId;

use crate::client::LiveResource;

/// Minimum length of a base token worth matching on.
const MIN_BASE_TOKEN_LEN: usize = 3;

/// The rule that paired a blueprint entry with a live resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchRule {
    /// Identical names.
    Exact,
    /// Same name once decoration and case are removed.
    Normalized,
    /// Same last significant word.
    BaseToken,
}

impl MatchRule {
    /// Rules from most to least specific.
    pub const ORDER: [Self; 3] = [Self::Exact, Self::Normalized, Self::BaseToken];
}

/// Fold a name to lowercase alphanumeric tokens joined by `-`.
///
/// `"🎫・Support Tickets"` becomes `"support-tickets"`.
#[must_use]
pub fn normalize(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// The last significant token of a name, if long enough to be meaningful.
#[must_use]
pub fn base_token(name: &str) -> Option<String> {
    normalize(name)
        .rsplit('-')
        .next()
        .filter(|t| t.chars().count() >= MIN_BASE_TOKEN_LEN)
        .map(str::to_string)
}

/// A blueprint entry looking for its live counterpart.
#[derive(Debug, Clone, Copy)]
pub struct MatchRequest<'a> {
    /// Desired name.
    pub name: &'a str,
    /// Parent whose children are tried before any other candidate.
    pub preferred_parent: Option<ResourceId>,
}

/// A successful pairing.
#[derive(Debug, Clone, Copy)]
pub struct Matched<'a> {
    /// The live resource.
    pub resource: &'a LiveResource,
    /// Rule that produced the pairing.
    pub rule: MatchRule,
}

/// Result of matching a set of requests against a candidate pool.
#[derive(Debug)]
pub struct MatchOutcome<'a> {
    /// One slot per request, in request order.
    pub matches: Vec<Option<Matched<'a>>>,
    /// Candidates nobody claimed.
    pub unmatched: Vec<&'a LiveResource>,
}

struct Keys {
    exact: String,
    normalized: String,
    base: Option<String>,
}

impl Keys {
    fn of(name: &str) -> Self {
        Self {
            exact: name.to_string(),
            normalized: normalize(name),
            base: base_token(name),
        }
    }

    fn agrees(&self, other: &Self, rule: MatchRule) -> bool {
        match rule {
            MatchRule::Exact => self.exact == other.exact,
            MatchRule::Normalized => !self.normalized.is_empty() && self.normalized == other.normalized,
            MatchRule::BaseToken => self.base.is_some() && self.base == other.base,
        }
    }
}

/// Pair each request with at most one candidate.
///
/// A claimed candidate leaves the pool. Each rule runs two passes over the
/// requests in order: first only candidates under the request's preferred
/// parent, then any candidate.
#[must_use]
pub fn match_resources<'a>(
    requests: &[MatchRequest<'_>],
    candidates: Vec<&'a LiveResource>,
) -> MatchOutcome<'a> {
    let wanted: Vec<Keys> = requests.iter().map(|r| Keys::of(r.name)).collect();
    let mut pool: Vec<(Keys, Option<&'a LiveResource>)> = candidates
        .into_iter()
        .map(|c| (Keys::of(&c.name), Some(c)))
        .collect();
    let mut matches: Vec<Option<Matched<'a>>> = vec![None; requests.len()];

    for rule in MatchRule::ORDER {
        for same_parent_only in [true, false] {
            for (index, request) in requests.iter().enumerate() {
                if matches[index].is_some() {
                    continue;
                }
                if same_parent_only && request.preferred_parent.is_none() {
                    continue;
                }
                let keys = &wanted[index];

                let chosen = pool.iter().position(|(candidate_keys, slot)| {
                    slot.is_some_and(|c| {
                        !same_parent_only || c.parent_id == request.preferred_parent
                    }) && keys.agrees(candidate_keys, rule)
                });

                if let Some(resource) = chosen.and_then(|i| pool[i].1.take()) {
                    matches[index] = Some(Matched { resource, rule });
                }
            }
        }
    }

    MatchOutcome {
        matches,
        unmatched: pool.into_iter().filter_map(|(_, slot)| slot).collect(),
    }
}
