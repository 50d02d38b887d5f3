//! Compensating actions for a session's mutations.
//!
//! A session's rollback stack is unwound in strict reverse order. Unwinding is
//! best-effort: one failed compensation is recorded and the rest still run.

use std::sync::Arc;

use guildforge_core::{ResourceId, ResourceKind, TenantId};
use guildforge_store::{RollbackEntry, RollbackOperation};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::client::ResourceClient;
use crate::error::ClientError;

/// Serializes rollback execution across the process.
///
/// Live failure handling and the cleanup sweep both unwind stacks. Whoever
/// holds the gate must re-read the stack from the store before acting on it.
#[derive(Debug, Clone, Default)]
pub struct RollbackGate {
    inner: Arc<Mutex<()>>,
}

impl RollbackGate {
    /// Create a new gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access.
    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().await
    }
}

/// A compensation that did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackFailure {
    /// Step that produced the entry.
    pub step_id: String,
    /// Kind of the resource left behind.
    pub resource_kind: ResourceKind,
    /// The resource left behind.
    pub resource_id: Option<ResourceId>,
    /// Why compensation failed.
    pub error: String,
}

/// What an unwind did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackSummary {
    /// Why the stack was unwound.
    pub reason: String,
    /// Step ids compensated, in the order they were undone.
    pub rolled_back: Vec<String>,
    /// Compensations that failed.
    pub failed: Vec<RollbackFailure>,
    /// Entries dropped without action (unconfirmed deletes and creates).
    pub discarded: usize,
}

impl RollbackSummary {
    /// An empty summary.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            rolled_back: Vec::new(),
            failed: Vec::new(),
            discarded: 0,
        }
    }

    /// Returns true if every compensation succeeded.
    #[must_use]
    pub fn fully_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    /// One-line description for errors and audit records.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.fully_succeeded() {
            format!(
                "rollback complete ({}): {} undone",
                self.reason,
                self.rolled_back.len()
            )
        } else {
            let left: Vec<String> = self
                .failed
                .iter()
                .map(|f| match f.resource_id {
                    Some(id) => format!("{} {id}", f.resource_kind),
                    None => f.resource_kind.to_string(),
                })
                .collect();
            format!(
                "rollback incomplete ({}): {} undone, {} left in place [{}]",
                self.reason,
                self.rolled_back.len(),
                self.failed.len(),
                left.join(", ")
            )
        }
    }
}

/// Unwind `stack` newest first.
///
/// On return `stack` holds only the entries whose compensation failed, in
/// their original order. A resource that is already gone counts as undone.
pub async fn unwind<C: ResourceClient + ?Sized>(
    client: &C,
    tenant: TenantId,
    stack: &mut Vec<RollbackEntry>,
    reason: &str,
) -> RollbackSummary {
    let mut summary = RollbackSummary::new(reason);
    let mut leftover = Vec::new();

    while let Some(entry) = stack.pop() {
        match compensate(client, tenant, &entry).await {
            Ok(Compensation::Undone) => {
                tracing::info!(
                    step = %entry.step_id,
                    kind = %entry.resource_kind,
                    "Rolled back"
                );
                summary.rolled_back.push(entry.step_id.clone());
            }
            Ok(Compensation::Discarded) => {
                tracing::debug!(step = %entry.step_id, "Discarded rollback entry");
                summary.discarded += 1;
            }
            Err(e) => {
                tracing::warn!(
                    step = %entry.step_id,
                    kind = %entry.resource_kind,
                    error = %e,
                    "Rollback of entry failed"
                );
                summary.failed.push(RollbackFailure {
                    step_id: entry.step_id.clone(),
                    resource_kind: entry.resource_kind,
                    resource_id: entry.resource_id,
                    error: e.to_string(),
                });
                leftover.push(entry);
            }
        }
    }

    leftover.reverse();
    *stack = leftover;
    summary
}

enum Compensation {
    Undone,
    Discarded,
}

async fn compensate<C: ResourceClient + ?Sized>(
    client: &C,
    tenant: TenantId,
    entry: &RollbackEntry,
) -> Result<Compensation, ClientError> {
    let Some(id) = entry.resource_id else {
        return Ok(Compensation::Discarded);
    };

    let outcome = match entry.operation {
        RollbackOperation::ResourceCreated => {
            client.delete(tenant, entry.resource_kind, id).await
        }
        RollbackOperation::ResourceUpdated => match &entry.prior {
            Some(prior) => client.update(tenant, entry.resource_kind, id, prior).await,
            None => return Ok(Compensation::Discarded),
        },
        RollbackOperation::ResourceDeletePending => return Ok(Compensation::Discarded),
    };

    match outcome {
        Ok(()) => Ok(Compensation::Undone),
        Err(e) if e.is_not_found() => Ok(Compensation::Undone),
        Err(e) => Err(e),
    }
}
