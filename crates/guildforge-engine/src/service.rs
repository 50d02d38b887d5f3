//! Provisioning service implementation.
//!
//! This module provides the `Provisioner` trait and `ProvisioningService`
//! implementation that coordinates snapshots, planning, execution and
//! session persistence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use guildforge_core::{SessionKey, TenantId};
use guildforge_store::{DeployedPanel, SessionState, Store, StoreError, WizardSession};

use crate::audit::{AuditEvent, AuditEventType, AuditSink, TracingAuditSink};
use crate::cache::SessionCache;
use crate::cleanup::{CleanupScheduler, EXPIRY_REASON};
use crate::client::ResourceClient;
use crate::error::{EngineError, Result};
use crate::executor::{AtomicExecutor, ExecutionReport, ExecutorOptions};
use crate::lifecycle;
use crate::plan::ReconciliationPlan;
use crate::prereq;
use crate::reconciler::Reconciler;
use crate::rollback::{self, RollbackGate, RollbackSummary};
use crate::session::{self, ActiveSessions};
use crate::snapshot::{LiveSnapshot, ProtectedResourceSet};
use crate::types::{EngineConfig, ProvisionRequest};

/// Rollback reason recorded when a resumed session has drifted.
const DRIFT_REASON: &str = "live state drifted";

/// Outcome of resuming one session at startup.
pub type ResumeOutcome = (SessionKey, Result<()>);

/// Caller-facing provisioning operations.
#[async_trait]
pub trait Provisioner: Send + Sync {
    // =========================================================================
    // Provisioning
    // =========================================================================

    /// Reconcile the tenant against the request's blueprint.
    ///
    /// Runs to completion before returning. A stale record under the same
    /// key is unwound and replaced.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::SessionAlreadyActive` if a live session holds
    /// the key, a pre-mutation error (`Prerequisite`, `BlueprintConflict`,
    /// `SnapshotUnavailable`) with nothing changed, or
    /// `EngineError::SetupOperation` after a step failed and was rolled back.
    async fn start_provisioning(&self, request: ProvisionRequest) -> Result<SessionKey>;

    /// Plan the request without mutating anything or creating a session.
    async fn preview_plan(&self, request: &ProvisionRequest) -> Result<ReconciliationPlan>;

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Get the stored record of a session.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::SessionNotFound` if there is no record.
    async fn get_session_status(&self, key: &SessionKey) -> Result<WizardSession>;

    /// Resume one stored session at its `current_index`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::SessionExpired` (after unwinding) if the
    /// session is past its expiry, or `EngineError::ResumeDrift` (after
    /// unwinding) if resources its completed steps created are gone.
    async fn resume_session(&self, key: SessionKey) -> Result<()>;

    /// Resume every `InProgress` session concurrently.
    async fn resume_in_progress(&self) -> Result<Vec<ResumeOutcome>>;
}

/// The main provisioning service implementation.
pub struct ProvisioningService<C: ResourceClient, S: Store> {
    client: Arc<C>,
    store: Arc<S>,
    cache: Arc<SessionCache>,
    audit: Arc<dyn AuditSink>,
    gate: RollbackGate,
    active: ActiveSessions,
    executor: AtomicExecutor<C, S>,
    cleanup: Arc<CleanupScheduler<C, S>>,
    config: EngineConfig,
}

impl<C: ResourceClient, S: Store> ProvisioningService<C, S> {
    /// Create a new provisioning service.
    #[must_use]
    pub fn new(
        client: Arc<C>,
        store: Arc<S>,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Self {
        let cache = Arc::new(SessionCache::new());
        let gate = RollbackGate::new();
        let active = ActiveSessions::new();

        let executor = AtomicExecutor::new(
            Arc::clone(&client),
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&audit),
            gate.clone(),
            ExecutorOptions {
                reversible_updates: config.reversible_updates,
            },
        );
        let cleanup = Arc::new(CleanupScheduler::new(
            Arc::clone(&client),
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&audit),
            gate.clone(),
            active.clone(),
            config.clone(),
        ));

        Self {
            client,
            store,
            cache,
            audit,
            gate,
            active,
            executor,
            cleanup,
            config,
        }
    }

    /// Create a service with default configuration that audits to the log.
    #[must_use]
    pub fn with_defaults(client: Arc<C>, store: Arc<S>) -> Self {
        Self::new(client, store, Arc::new(TracingAuditSink), EngineConfig::default())
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The cleanup scheduler sharing this service's locks.
    #[must_use]
    pub fn cleanup(&self) -> Arc<CleanupScheduler<C, S>> {
        Arc::clone(&self.cleanup)
    }

    /// Categories recorded as deployed for a tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn deployed_panels(&self, tenant: TenantId) -> Result<Vec<DeployedPanel>> {
        Ok(self.store.list_panels_by_tenant(tenant)?)
    }

    /// Fill the session cache from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn load_cache(&self) -> Result<usize> {
        self.cache.reload(&*self.store)
    }

    /// Snapshot the tenant and plan `request` against it.
    async fn plan_for(
        &self,
        request: &ProvisionRequest,
    ) -> Result<(ReconciliationPlan, ProtectedResourceSet)> {
        let snapshot = LiveSnapshot::capture(&*self.client, request.tenant_id).await?;
        let protected = ProtectedResourceSet::compute(&snapshot, request.origin_channel);
        let plan = Reconciler::plan(&request.blueprint, &snapshot, &protected)?;
        Ok((plan, protected))
    }

    /// Make room for a new session under `key`.
    async fn supersede(&self, key: &SessionKey) -> Result<()> {
        let Some(existing) = self.store.get_session(key)? else {
            return Ok(());
        };

        let now = Utc::now();
        let stale = !lifecycle::is_resumable(existing.state)
            || session::is_abandoned(&existing, self.config.inactivity(), now)
            || session::is_expired(&existing, now);
        if !stale {
            return Err(EngineError::SessionAlreadyActive(*key));
        }

        if self.cleanup.retire(key).await? {
            Ok(())
        } else {
            let remaining = self
                .store
                .get_session(key)?
                .map_or(0, |s| s.rollback_stack.len());
            Err(EngineError::RollbackPartialFailure {
                session: *key,
                remaining,
            })
        }
    }

    async fn provision(&self, request: &ProvisionRequest) -> Result<SessionKey> {
        let key = request.session_key();
        let _claim = self
            .active
            .try_claim(key)
            .ok_or(EngineError::SessionAlreadyActive(key))?;

        self.supersede(&key).await?;

        let (plan, protected) = self.plan_for(request).await?;
        prereq::check_prerequisites(
            &*self.client,
            &*self.store,
            request.tenant_id,
            &plan,
            request.origin_channel,
        )
        .await?;

        tracing::info!(
            session = %key,
            steps = plan.len(),
            protected = protected.len(),
            plan = %plan.summary(),
            "Starting provisioning"
        );

        let mut session = session::new_session(request, &plan, &self.config, Utc::now());
        self.store.put_session(&session)?;
        session::transition(&*self.store, &mut session, SessionState::InProgress)?;
        self.cache.insert(session.clone());

        self.run(&plan, &mut session).await?;
        Ok(key)
    }

    async fn run(&self, plan: &ReconciliationPlan, session: &mut WizardSession) -> Result<()> {
        let report = self.executor.execute(plan, session).await?;
        self.finish(plan, session, &report)
    }

    /// Record deployed panels, mark the session completed and drop it.
    fn finish(
        &self,
        plan: &ReconciliationPlan,
        session: &mut WizardSession,
        report: &ExecutionReport,
    ) -> Result<()> {
        let now = Utc::now();
        for category in &session.blueprint.categories {
            if let Some(id) = report.categories.get(&category.name) {
                self.store.put_panel(&DeployedPanel {
                    tenant_id: session.key.tenant_id,
                    resource_id: *id,
                    name: category.name.clone(),
                    deployed_by: session.key,
                    deployed_at: now,
                })?;
            }
        }

        session.rollback_stack.clear();
        session::transition(&*self.store, session, SessionState::Completed)?;
        match self.store.delete_session(&session.key) {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        self.cache.remove(&session.key);

        self.audit.record(AuditEvent::new(
            AuditEventType::PlanExecuted,
            Some(session.key),
            format!(
                "{}; {} executed, {} skipped",
                plan.summary(),
                report.executed.len(),
                report.skipped.len()
            ),
        ));
        tracing::info!(
            session = %session.key,
            executed = report.executed.len(),
            deleted = report.deleted,
            "Provisioning completed"
        );
        Ok(())
    }

    /// Unwind a session that can't be resumed and mark it aborted.
    async fn abort_resumed(&self, session: &mut WizardSession, reason: &str) -> RollbackSummary {
        let key = session.key;
        let summary = {
            let _gate = self.gate.acquire().await;
            rollback::unwind(
                &*self.client,
                key.tenant_id,
                &mut session.rollback_stack,
                reason,
            )
            .await
        };

        if let Err(e) = session::transition(&*self.store, session, SessionState::Aborted) {
            tracing::error!(session = %key, error = %e, "Failed to abort session");
        }
        self.cache.insert(session.clone());
        summary
    }

    fn audit_partial_rollback(&self, session: &WizardSession, summary: &RollbackSummary) {
        if !summary.fully_succeeded() {
            self.audit.record(AuditEvent::new(
                AuditEventType::RollbackExecuted,
                Some(session.key),
                EngineError::RollbackPartialFailure {
                    session: session.key,
                    remaining: session.rollback_stack.len(),
                }
                .to_string(),
            ));
        }
    }

    /// Unwind an expired session and mark it aborted.
    async fn expire(&self, session: &mut WizardSession) -> EngineError {
        let summary = self.abort_resumed(session, EXPIRY_REASON).await;
        self.audit.record(AuditEvent::new(
            AuditEventType::SessionExpired,
            Some(session.key),
            summary.describe(),
        ));
        self.audit_partial_rollback(session, &summary);

        tracing::warn!(session = %session.key, "Refused to resume expired session");
        EngineError::SessionExpired(session.key)
    }

    /// Unwind a session whose completed work was removed out of band.
    async fn drifted(&self, session: &mut WizardSession, steps: Vec<String>) -> EngineError {
        let summary = self.abort_resumed(session, DRIFT_REASON).await;
        self.audit_partial_rollback(session, &summary);

        tracing::warn!(
            session = %session.key,
            steps = ?steps,
            rollback = %summary.describe(),
            "Refused to resume drifted session"
        );
        EngineError::ResumeDrift {
            session: session.key,
            steps,
        }
    }

    fn audit_failure(&self, key: SessionKey, error: &EngineError) {
        // Step failures are already audited by the executor
        if !matches!(error, EngineError::SetupOperation { .. }) {
            self.audit.record(AuditEvent::new(
                AuditEventType::StepFailed,
                Some(key),
                error.to_string(),
            ));
        }
    }
}

#[async_trait]
impl<C: ResourceClient + 'static, S: Store + 'static> Provisioner for ProvisioningService<C, S> {
    async fn start_provisioning(&self, request: ProvisionRequest) -> Result<SessionKey> {
        let key = request.session_key();
        self.provision(&request).await.inspect_err(|e| {
            tracing::warn!(
                session = %key,
                error = %e,
                retriable = e.is_retriable(),
                pre_mutation = e.is_pre_mutation(),
                "Provisioning failed"
            );
            self.audit_failure(key, e);
        })
    }

    async fn preview_plan(&self, request: &ProvisionRequest) -> Result<ReconciliationPlan> {
        let (plan, _) = self.plan_for(request).await?;
        Ok(plan)
    }

    async fn get_session_status(&self, key: &SessionKey) -> Result<WizardSession> {
        self.cache
            .get_or_load(&*self.store, key)?
            .ok_or(EngineError::SessionNotFound(*key))
    }

    async fn resume_session(&self, key: SessionKey) -> Result<()> {
        let _claim = self
            .active
            .try_claim(key)
            .ok_or(EngineError::SessionAlreadyActive(key))?;

        let mut session = session::get_session(&*self.store, &key)?;
        if !lifecycle::is_resumable(session.state) {
            return Err(EngineError::InvalidState {
                key,
                from: session.state,
                to: SessionState::InProgress,
            });
        }
        if session::is_expired(&session, Utc::now()) {
            return Err(self.expire(&mut session).await);
        }

        let request = ProvisionRequest {
            tenant_id: key.tenant_id,
            initiator_id: key.initiator_id,
            blueprint: session.blueprint.clone(),
            origin_channel: session.origin_channel,
        };
        let outcome = async {
            let (plan, _) = self.plan_for(&request).await?;
            prereq::check_prerequisites(
                &*self.client,
                &*self.store,
                key.tenant_id,
                &plan,
                session.origin_channel,
            )
            .await?;

            let vanished = session::vanished_steps(&session, &plan);
            if !vanished.is_empty() {
                return Err(self.drifted(&mut session, vanished).await);
            }

            let added = session::merge_resumed_steps(&mut session, &plan);
            tracing::info!(
                session = %key,
                current_index = session.current_index,
                remaining = session.ordered_steps.len() - session.current_index,
                added = added.len(),
                "Resuming session"
            );

            if session.state == SessionState::Created {
                session::transition(&*self.store, &mut session, SessionState::InProgress)?;
            } else {
                self.store.put_session(&session)?;
            }
            self.cache.insert(session.clone());

            self.run(&plan, &mut session).await
        }
        .await;

        outcome.inspect_err(|e| {
            tracing::warn!(
                session = %key,
                error = %e,
                retriable = e.is_retriable(),
                "Resume failed"
            );
            self.audit_failure(key, e);
        })
    }

    async fn resume_in_progress(&self) -> Result<Vec<ResumeOutcome>> {
        let keys: Vec<SessionKey> = self
            .store
            .list_sessions_by_state(SessionState::InProgress)?
            .into_iter()
            .map(|s| s.key)
            .collect();

        if keys.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!(count = keys.len(), "Resuming in-progress sessions");

        let outcomes = join_all(keys.iter().map(|key| self.resume_session(*key))).await;
        Ok(keys.into_iter().zip(outcomes).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::client::mock::MockResourceClient;
    use crate::client::Capabilities;
    use guildforge_core::{Blueprint, CategorySpec, ChannelSpec, InitiatorId, ResourceKind};
    use guildforge_store::RocksStore;
    use tempfile::TempDir;

    const TENANT: TenantId = TenantId::new(1);

    fn setup() -> (
        ProvisioningService<MockResourceClient, RocksStore>,
        Arc<MockResourceClient>,
        Arc<MemoryAuditSink>,
        TempDir,
    ) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let client = Arc::new(MockResourceClient::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let service = ProvisioningService::new(
            Arc::clone(&client),
            store,
            audit.clone(),
            EngineConfig::default(),
        );
        (service, client, audit, dir)
    }

    fn blueprint() -> Blueprint {
        Blueprint {
            roles: vec![],
            categories: vec![CategorySpec {
                name: "Support".to_string(),
                permission_template: None,
                channels: vec![ChannelSpec {
                    name: "general".to_string(),
                    permission_template: None,
                }],
            }],
        }
    }

    fn request(initiator: u64) -> ProvisionRequest {
        ProvisionRequest::new(TENANT, InitiatorId::new(initiator), blueprint())
    }

    #[tokio::test]
    async fn start_provisioning_completes_and_tracks_panels() {
        let (service, client, audit, _dir) = setup();

        let key = service.start_provisioning(request(2)).await.unwrap();

        // Completed sessions are removed
        let status = service.get_session_status(&key).await;
        assert!(matches!(status, Err(EngineError::SessionNotFound(_))));
        assert!(service.store().list_all_sessions().unwrap().is_empty());
        assert!(client.find(TENANT, ResourceKind::Channel, "general").is_some());

        let panels = service.deployed_panels(TENANT).unwrap();
        assert_eq!(panels.len(), 1);
        assert_eq!(panels[0].name, "Support");
        assert_eq!(audit.of_type(AuditEventType::PlanExecuted).len(), 1);
    }

    #[tokio::test]
    async fn prerequisite_failure_leaves_no_record() {
        let (service, client, audit, _dir) = setup();
        client.set_capabilities(
            TENANT,
            Capabilities {
                manage_roles: true,
                manage_channels: false,
            },
        );

        let err = service.start_provisioning(request(2)).await.unwrap_err();

        assert!(matches!(err, EngineError::Prerequisite { .. }));
        assert!(client.calls().is_empty());
        let status = service.get_session_status(&request(2).session_key()).await;
        assert!(matches!(status, Err(EngineError::SessionNotFound(_))));
        assert_eq!(audit.of_type(AuditEventType::StepFailed).len(), 1);
    }

    #[tokio::test]
    async fn live_session_blocks_second_start() {
        let (service, _client, _audit, _dir) = setup();
        let mut live = session::new_session(
            &request(2),
            &ReconciliationPlan::default(),
            &EngineConfig::default(),
            Utc::now(),
        );
        live.state = SessionState::InProgress;
        service.store().put_session(&live).unwrap();

        let err = service.start_provisioning(request(2)).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionAlreadyActive(_)));

        // A different initiator in the same tenant is independent
        service.start_provisioning(request(3)).await.unwrap();
    }

    #[tokio::test]
    async fn preview_does_not_mutate() {
        let (service, client, _audit, _dir) = setup();
        client.seed(TENANT, ResourceKind::Category, "Old", 0, None);

        let plan = service.preview_plan(&request(2)).await.unwrap();

        assert_eq!(
            plan.step_ids(),
            vec!["delete:category:1001", "category:Support", "channel:Support/general"]
        );
        assert!(client.calls().is_empty());
        assert!(service.store().list_all_sessions().unwrap().is_empty());
    }
}
