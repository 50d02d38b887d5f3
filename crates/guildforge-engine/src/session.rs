//! Wizard session records and in-process ownership.
//!
//! The store is the source of truth for session progress. [`ActiveSessions`]
//! only tracks which sessions this process is currently driving, so cleanup
//! and new requests leave them alone.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use guildforge_core::SessionKey;
use guildforge_store::{SessionState, Store, WizardSession};
use parking_lot::Mutex;

use crate::error::{EngineError, Result};
use crate::lifecycle;
use crate::plan::{PlanAction, ReconciliationPlan};
use crate::types::{EngineConfig, ProvisionRequest};

/// Build a fresh session record for a planned request.
#[must_use]
pub fn new_session(
    request: &ProvisionRequest,
    plan: &ReconciliationPlan,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> WizardSession {
    WizardSession {
        key: request.session_key(),
        state: SessionState::Created,
        blueprint: request.blueprint.clone(),
        origin_channel: request.origin_channel,
        ordered_steps: plan.step_ids(),
        current_index: 0,
        completed_steps: std::collections::BTreeSet::new(),
        rollback_stack: Vec::new(),
        started_at: now,
        updated_at: now,
        expires_at: now
            .checked_add_signed(config.ttl())
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
        last_error: None,
    }
}

/// Whether a live session has outlived the inactivity threshold.
///
/// Measured from `started_at`, independently of `expires_at`.
#[must_use]
pub fn is_abandoned(session: &WizardSession, inactivity: chrono::Duration, now: DateTime<Utc>) -> bool {
    lifecycle::is_resumable(session.state) && now.signed_duration_since(session.started_at) >= inactivity
}

/// Whether the session is past its hard expiry.
#[must_use]
pub fn is_expired(session: &WizardSession, now: DateTime<Utc>) -> bool {
    now >= session.expires_at
}

/// Fold a fresh plan into a resumed session.
///
/// Steps before `current_index` stay as they are and are never re-run. The
/// pending tail is replaced by the fresh plan's order, minus anything already
/// completed. Returns the step ids that were not in the session before.
pub fn merge_resumed_steps(session: &mut WizardSession, plan: &ReconciliationPlan) -> Vec<String> {
    let index = session.current_index.min(session.ordered_steps.len());
    let known: HashSet<String> = session.ordered_steps.iter().cloned().collect();
    let done: HashSet<&String> = session.ordered_steps[..index]
        .iter()
        .chain(&session.completed_steps)
        .collect();

    let tail: Vec<String> = plan
        .step_ids()
        .into_iter()
        .filter(|id| !done.contains(id))
        .collect();
    let added: Vec<String> = tail.iter().filter(|id| !known.contains(*id)).cloned().collect();

    session.ordered_steps.truncate(index);
    session.ordered_steps.extend(tail);
    session.current_index = index;
    added
}

/// Completed steps whose resource the fresh plan wants to create again.
///
/// A non-empty result means something the session already provisioned was
/// removed out of band while it was suspended.
#[must_use]
pub fn vanished_steps(session: &WizardSession, plan: &ReconciliationPlan) -> Vec<String> {
    let index = session.current_index.min(session.ordered_steps.len());
    plan.actions
        .iter()
        .filter(|action| matches!(action, PlanAction::Create { .. }))
        .map(PlanAction::step_id)
        .filter(|id| session.ordered_steps[..index].contains(id) || session.completed_steps.contains(id))
        .collect()
}

/// Move a session to `to`, validate the transition and persist it.
///
/// # Errors
///
/// Returns `EngineError::InvalidState` if the transition is not allowed, or a
/// store error if the write fails.
pub fn transition<S: Store + ?Sized>(
    store: &S,
    session: &mut WizardSession,
    to: SessionState,
) -> Result<()> {
    lifecycle::validate_transition(&session.key, session.state, to)?;
    tracing::debug!(session = %session.key, from = ?session.state, to = ?to, "Session transition");
    session.state = to;
    session.updated_at = Utc::now();
    store.put_session(session)?;
    Ok(())
}

/// Get a session by key.
///
/// # Errors
///
/// Returns `EngineError::SessionNotFound` if no record exists.
pub fn get_session<S: Store + ?Sized>(store: &S, key: &SessionKey) -> Result<WizardSession> {
    store
        .get_session(key)?
        .ok_or(EngineError::SessionNotFound(*key))
}

/// Sessions currently driven by this process.
#[derive(Debug, Clone, Default)]
pub struct ActiveSessions {
    inner: Arc<Mutex<HashSet<SessionKey>>>,
}

impl ActiveSessions {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or `None` if another task already drives it.
    ///
    /// The claim is released when the guard is dropped.
    #[must_use]
    pub fn try_claim(&self, key: SessionKey) -> Option<ActiveGuard> {
        if self.inner.lock().insert(key) {
            Some(ActiveGuard {
                key,
                inner: Arc::clone(&self.inner),
            })
        } else {
            None
        }
    }

    /// Whether `key` is currently claimed.
    #[must_use]
    pub fn contains(&self, key: &SessionKey) -> bool {
        self.inner.lock().contains(key)
    }

    /// Number of claimed sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if nothing is claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Releases a session claim on drop.
#[derive(Debug)]
pub struct ActiveGuard {
    key: SessionKey,
    inner: Arc<Mutex<HashSet<SessionKey>>>,
}

impl ActiveGuard {
    /// The claimed session.
    #[must_use]
    pub const fn key(&self) -> SessionKey {
        self.key
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.inner.lock().remove(&self.key);
    }
}
