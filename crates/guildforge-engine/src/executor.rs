//! Atomic execution of reconciliation plans.
//!
//! Every successful mutation pushes a compensating entry onto the session's
//! rollback stack, and the session is persisted after every step attempt. On
//! the first failure the stack is unwound newest first and the original error
//! is returned wrapped with the rollback summary.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use guildforge_core::{
    ResourceAttributes, ResourceId, ResourceKind, ResourceSpec, SessionKey, TenantId,
};
use guildforge_store::{RollbackEntry, RollbackOperation, SessionState, Store, WizardSession};

use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::cache::SessionCache;
use crate::client::{LiveResource, ResourceClient, ResourceDraft};
use crate::error::{ClientError, EngineError, Result};
use crate::lifecycle;
use crate::plan::{PlanAction, ReconciliationPlan};
use crate::rollback::{self, RollbackGate, RollbackSummary};

/// Options that change how steps are recorded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorOptions {
    /// Record prior attributes of updates so rollback restores them.
    pub reversible_updates: bool,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Steps executed in this run, in order.
    pub executed: Vec<String>,
    /// Steps passed over because they were already done or no longer needed.
    pub skipped: Vec<String>,
    /// Blueprint category name to live id, for every category in the plan's scope.
    pub categories: BTreeMap<String, ResourceId>,
    /// Live resources deleted.
    pub deleted: usize,
}

/// Runs plan steps for one session at a time.
pub struct AtomicExecutor<C: ResourceClient, S: Store> {
    client: Arc<C>,
    store: Arc<S>,
    cache: Arc<SessionCache>,
    audit: Arc<dyn AuditSink>,
    gate: RollbackGate,
    options: ExecutorOptions,
}

impl<C: ResourceClient, S: Store> AtomicExecutor<C, S> {
    /// Create a new executor.
    #[must_use]
    pub fn new(
        client: Arc<C>,
        store: Arc<S>,
        cache: Arc<SessionCache>,
        audit: Arc<dyn AuditSink>,
        gate: RollbackGate,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            client,
            store,
            cache,
            audit,
            gate,
            options,
        }
    }

    /// Execute the session's pending steps against `plan`.
    ///
    /// Starts at `session.current_index`. Steps already completed, or absent
    /// from `plan`, are passed over without a platform call.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::SetupOperation` after unwinding the rollback
    /// stack if any step (or the progress write after it) fails.
    pub async fn execute(
        &self,
        plan: &ReconciliationPlan,
        session: &mut WizardSession,
    ) -> Result<ExecutionReport> {
        let tenant = session.key.tenant_id;
        let mut report = ExecutionReport {
            categories: plan.parents.clone(),
            ..ExecutionReport::default()
        };

        while session.current_index < session.ordered_steps.len() {
            let step = session.ordered_steps[session.current_index].clone();

            let action = match plan.find(&step) {
                Some(action) if !session.completed_steps.contains(&step) => action,
                _ => {
                    tracing::debug!(session = %session.key, step = %step, "Skipping step");
                    session.current_index += 1;
                    report.skipped.push(step);
                    continue;
                }
            };

            tracing::info!(
                session = %session.key,
                step = %step,
                action = action.verb(),
                "Executing step"
            );

            let outcome = self.apply(tenant, action, session, &mut report).await;
            session.updated_at = Utc::now();

            match outcome {
                Ok(()) => {
                    session.completed_steps.insert(step.clone());
                    session.current_index += 1;
                    session.last_error = None;
                    report.executed.push(step.clone());
                    if let Err(e) = self.persist(session) {
                        return Err(self.abort(session, step, e).await);
                    }
                }
                Err(e) => {
                    session.last_error = Some(e.to_string());
                    if let Err(persist_err) = self.persist(session) {
                        tracing::warn!(
                            session = %session.key,
                            error = %persist_err,
                            "Failed to persist failed step"
                        );
                    }
                    return Err(self.abort(session, step, e).await);
                }
            }
        }

        Ok(report)
    }

    fn persist(&self, session: &WizardSession) -> Result<()> {
        self.store.put_session(session)?;
        self.cache.insert(session.clone());
        Ok(())
    }

    async fn apply(
        &self,
        tenant: TenantId,
        action: &PlanAction,
        session: &mut WizardSession,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        let step = action.step_id();
        let step_err = |source: ClientError| EngineError::StepExecution {
            step: step.clone(),
            source,
        };

        match action {
            PlanAction::Create { spec } => {
                let parent_id = resolve_parent(spec, &report.categories)?;
                let draft = ResourceDraft {
                    kind: spec.kind(),
                    attributes: ResourceAttributes {
                        name: spec.name().to_string(),
                        position: spec.position(),
                        permission_template: spec.permission_template().map(str::to_string),
                        parent_id,
                    },
                };
                let id = self.client.create(tenant, &draft).await.map_err(step_err)?;
                let entry = rollback_entry(
                    session.key,
                    RollbackOperation::ResourceCreated,
                    spec.kind(),
                    id,
                    parent_id,
                    &step,
                    None,
                );
                session.rollback_stack.push(entry);
                if spec.kind() == ResourceKind::Category {
                    report.categories.insert(spec.name().to_string(), id);
                }
            }
            PlanAction::Update { id, spec, current } => {
                let parent_id = resolve_parent(spec, &report.categories)?;
                let attributes = desired_attributes(spec, current, parent_id);
                self.client
                    .update(tenant, spec.kind(), *id, &attributes)
                    .await
                    .map_err(step_err)?;
                if self.options.reversible_updates {
                    let entry = rollback_entry(
                        session.key,
                        RollbackOperation::ResourceUpdated,
                        spec.kind(),
                        *id,
                        current.parent_id,
                        &step,
                        Some(current.attributes()),
                    );
                    session.rollback_stack.push(entry);
                } else {
                    tracing::debug!(
                        session = %session.key,
                        step = %step,
                        prior_position = current.position,
                        "Update recorded in log only"
                    );
                }
                if spec.kind() == ResourceKind::Category {
                    report.categories.insert(spec.name().to_string(), *id);
                }
            }
            PlanAction::Move { id, name, from, to } => {
                self.client
                    .move_child(tenant, *id, *to)
                    .await
                    .map_err(step_err)?;
                tracing::info!(
                    session = %session.key,
                    channel = %name,
                    from = ?from,
                    to = ?to,
                    "Moved channel"
                );
            }
            PlanAction::Delete {
                id,
                kind,
                name,
                parent_id,
            } => {
                let entry = rollback_entry(
                    session.key,
                    RollbackOperation::ResourceDeletePending,
                    *kind,
                    *id,
                    *parent_id,
                    &step,
                    None,
                );
                session.rollback_stack.push(entry);
                self.persist(session)?;

                match self.client.delete(tenant, *kind, *id).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        tracing::debug!(session = %session.key, step = %step, "Already deleted");
                    }
                    Err(e) => return Err(step_err(e)),
                }
                session.rollback_stack.pop();
                report.deleted += 1;
                self.audit.record(
                    AuditEvent::new(
                        AuditEventType::ResourceDeleted,
                        Some(session.key),
                        format!("deleted {kind} {name:?} ({id})"),
                    )
                    .with_step(step.clone()),
                );
            }
        }
        Ok(())
    }

    /// Unwind the session's stack and build the terminal error.
    async fn abort(
        &self,
        session: &mut WizardSession,
        step: String,
        source: EngineError,
    ) -> EngineError {
        tracing::error!(session = %session.key, step = %step, error = %source, "Step failed");
        self.audit.record(
            AuditEvent::new(AuditEventType::StepFailed, Some(session.key), source.to_string())
                .with_step(step.clone()),
        );

        let summary = {
            let _gate = self.gate.acquire().await;
            let mut stack = self.stack_for_unwind(session);
            let summary =
                rollback::unwind(&*self.client, session.key.tenant_id, &mut stack, "step failed")
                    .await;
            session.rollback_stack = stack;
            summary
        };

        if lifecycle::is_valid_transition(session.state, SessionState::Aborted) {
            session.state = SessionState::Aborted;
        }
        session.updated_at = Utc::now();
        if let Err(e) = self.persist(session) {
            tracing::error!(session = %session.key, error = %e, "Failed to persist aborted session");
        }

        self.record_rollback(session, &summary);

        EngineError::SetupOperation {
            step,
            source: Box::new(source),
            rollback: summary,
        }
    }

    /// The stack to unwind, read under the rollback gate.
    ///
    /// If cleanup already retired the record, its stack is gone and must not
    /// be compensated again.
    fn stack_for_unwind(&self, session: &WizardSession) -> Vec<RollbackEntry> {
        match self.store.get_session(&session.key) {
            Ok(None) => Vec::new(),
            Ok(Some(stored)) if !lifecycle::is_resumable(stored.state) => stored.rollback_stack,
            Ok(Some(_)) => session.rollback_stack.clone(),
            Err(e) => {
                tracing::warn!(session = %session.key, error = %e, "Using in-memory rollback stack");
                session.rollback_stack.clone()
            }
        }
    }

    fn record_rollback(&self, session: &WizardSession, summary: &RollbackSummary) {
        self.audit.record(AuditEvent::new(
            AuditEventType::RollbackExecuted,
            Some(session.key),
            summary.describe(),
        ));
        if !summary.fully_succeeded() {
            let partial = EngineError::RollbackPartialFailure {
                session: session.key,
                remaining: session.rollback_stack.len(),
            };
            tracing::error!(session = %session.key, error = %partial, "Rollback left resources behind");
            self.audit.record(AuditEvent::new(
                AuditEventType::RollbackExecuted,
                Some(session.key),
                partial.to_string(),
            ));
        }
    }
}

fn rollback_entry(
    owner: SessionKey,
    operation: RollbackOperation,
    kind: ResourceKind,
    id: ResourceId,
    parent: Option<ResourceId>,
    step: &str,
    prior: Option<ResourceAttributes>,
) -> RollbackEntry {
    RollbackEntry {
        operation,
        resource_kind: kind,
        resource_id: Some(id),
        parent_context_ids: parent.into_iter().collect(),
        owner,
        step_id: step.to_string(),
        prior,
        created_at: Utc::now(),
    }
}

/// Parent category id for a channel spec, looked up by blueprint name.
fn resolve_parent(
    spec: &ResourceSpec,
    categories: &BTreeMap<String, ResourceId>,
) -> Result<Option<ResourceId>> {
    match spec.parent_ref() {
        None => Ok(None),
        Some(category) => categories.get(category).copied().map(Some).ok_or_else(|| {
            EngineError::Internal(format!(
                "category {category:?} has no live id before {}",
                spec.identity()
            ))
        }),
    }
}

/// Attributes an update writes: the live name is kept, the position is
/// always written and a missing template leaves the current one in place.
fn desired_attributes(
    spec: &ResourceSpec,
    current: &LiveResource,
    parent_id: Option<ResourceId>,
) -> ResourceAttributes {
    ResourceAttributes {
        name: current.name.clone(),
        position: spec.position(),
        permission_template: spec
            .permission_template()
            .map(str::to_string)
            .or_else(|| current.permission_template.clone()),
        parent_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::client::mock::{MockCall, MockResourceClient};
    use crate::reconciler::Reconciler;
    use crate::session::new_session;
    use crate::snapshot::{LiveSnapshot, ProtectedResourceSet};
    use crate::types::{EngineConfig, ProvisionRequest};
    use guildforge_core::{Blueprint, InitiatorId};
    use guildforge_store::RocksStore;
    use tempfile::TempDir;

    const TENANT: TenantId = TenantId::new(1);

    struct Harness {
        _dir: TempDir,
        client: Arc<MockResourceClient>,
        store: Arc<RocksStore>,
        audit: Arc<MemoryAuditSink>,
        executor: AtomicExecutor<MockResourceClient, RocksStore>,
    }

    fn harness(options: ExecutorOptions) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let client = Arc::new(MockResourceClient::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let executor = AtomicExecutor::new(
            Arc::clone(&client),
            Arc::clone(&store),
            Arc::new(SessionCache::new()),
            audit.clone(),
            RollbackGate::new(),
            options,
        );
        Harness {
            _dir: dir,
            client,
            store,
            audit,
            executor,
        }
    }

    fn blueprint() -> Blueprint {
        Blueprint::from_json(
            r#"{"categories": [{"name": "Support", "channels": [{"name": "general"}]}]}"#,
        )
        .unwrap()
    }

    async fn planned(h: &Harness, blueprint: &Blueprint) -> (ReconciliationPlan, WizardSession) {
        let snapshot = LiveSnapshot::capture(&*h.client, TENANT).await.unwrap();
        let protected = ProtectedResourceSet::compute(&snapshot, None);
        let plan = Reconciler::plan(blueprint, &snapshot, &protected).unwrap();
        let request = ProvisionRequest::new(TENANT, InitiatorId::new(7), blueprint.clone());
        let mut session = new_session(&request, &plan, &EngineConfig::default(), Utc::now());
        session.state = SessionState::InProgress;
        h.store.put_session(&session).unwrap();
        (plan, session)
    }

    #[tokio::test]
    async fn successful_run_persists_progress() {
        let h = harness(ExecutorOptions::default());
        h.client.seed(TENANT, ResourceKind::Category, "Old", 0, None);
        let (plan, mut session) = planned(&h, &blueprint()).await;

        let report = h.executor.execute(&plan, &mut session).await.unwrap();

        assert_eq!(report.executed.len(), 3);
        assert_eq!(report.deleted, 1);
        assert!(report.categories.contains_key("Support"));

        let stored = h.store.get_session(&session.key).unwrap().unwrap();
        assert_eq!(stored.current_index, 3);
        assert_eq!(stored.completed_steps.len(), 3);
        // Only the two creates remain compensable
        assert_eq!(stored.rollback_stack.len(), 2);
        assert_eq!(h.audit.of_type(AuditEventType::ResourceDeleted).len(), 1);

        let general = h.client.find(TENANT, ResourceKind::Channel, "general").unwrap();
        assert_eq!(general.parent_id, report.categories.get("Support").copied());
    }

    #[tokio::test]
    async fn failure_unwinds_and_wraps_error() {
        let h = harness(ExecutorOptions::default());
        h.client.seed(TENANT, ResourceKind::Category, "Old", 0, None);
        h.client.fail_on_create("general");
        let (plan, mut session) = planned(&h, &blueprint()).await;

        let err = h.executor.execute(&plan, &mut session).await.unwrap_err();

        match &err {
            EngineError::SetupOperation { step, rollback, .. } => {
                assert_eq!(step, "channel:Support/general");
                assert!(rollback.fully_succeeded());
                assert_eq!(rollback.rolled_back, vec!["category:Support"]);
            }
            other => panic!("expected SetupOperation, got {other:?}"),
        }
        assert!(h.client.resources(TENANT).is_empty());

        let stored = h.store.get_session(&session.key).unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Aborted);
        assert_eq!(stored.current_index, 2);
        assert!(stored.rollback_stack.is_empty());
        assert!(stored.last_error.is_some());
        assert_eq!(h.audit.of_type(AuditEventType::StepFailed).len(), 1);
        assert_eq!(h.audit.of_type(AuditEventType::RollbackExecuted).len(), 1);
    }

    #[tokio::test]
    async fn partial_rollback_keeps_leftovers() {
        let h = harness(ExecutorOptions::default());
        h.client.fail_on_create("general");
        let (plan, mut session) = planned(&h, &blueprint()).await;
        // The category create succeeds, then its delete fails during unwind
        let support_id = ResourceId::new(1001);
        h.client.fail_on_delete(support_id);

        let err = h.executor.execute(&plan, &mut session).await.unwrap_err();

        let EngineError::SetupOperation { rollback, .. } = err else {
            panic!("expected SetupOperation");
        };
        assert!(!rollback.fully_succeeded());
        let stored = h.store.get_session(&session.key).unwrap().unwrap();
        assert_eq!(stored.rollback_stack.len(), 1);
        assert_eq!(stored.rollback_stack[0].resource_id, Some(support_id));
        assert_eq!(h.audit.of_type(AuditEventType::RollbackExecuted).len(), 2);
    }

    #[tokio::test]
    async fn resumed_run_skips_completed_prefix() {
        let h = harness(ExecutorOptions::default());
        let (plan, mut session) = planned(&h, &blueprint()).await;
        session.current_index = 1;
        session.completed_steps.insert("category:Support".to_string());
        // Pretend the category already exists from the interrupted run
        let id = h.client.seed(TENANT, ResourceKind::Category, "Support", 0, None);
        let mut plan = plan;
        plan.parents.insert("Support".to_string(), id);

        let report = h.executor.execute(&plan, &mut session).await.unwrap();

        assert_eq!(report.executed, vec!["channel:Support/general"]);
        assert!(!h
            .client
            .calls()
            .iter()
            .any(|c| matches!(c, MockCall::Create { kind: ResourceKind::Category, .. })));
    }

    #[tokio::test]
    async fn reversible_updates_are_compensated() {
        let h = harness(ExecutorOptions {
            reversible_updates: true,
        });
        let cat = h.client.seed(TENANT, ResourceKind::Category, "Support", 5, None);
        h.client.fail_on_create("general");
        let (plan, mut session) = planned(&h, &blueprint()).await;

        let err = h.executor.execute(&plan, &mut session).await.unwrap_err();

        assert!(matches!(err, EngineError::SetupOperation { .. }));
        let support = h.client.find(TENANT, ResourceKind::Category, "Support").unwrap();
        assert_eq!(support.id, cat);
        assert_eq!(support.position, 5);
    }
}
