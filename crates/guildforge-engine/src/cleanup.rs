//! Periodic cleanup of abandoned sessions and stale panel records.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use guildforge_core::{ResourceKind, SessionKey, TenantId};
use guildforge_store::{DeployedPanel, SessionState, Store, StoreError, WizardSession};

use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::cache::SessionCache;
use crate::client::ResourceClient;
use crate::error::{EngineError, Result};
use crate::rollback::{self, RollbackGate};
use crate::session::{self, ActiveSessions};
use crate::types::EngineConfig;

/// Reason recorded when cleanup unwinds a session.
pub const EXPIRY_REASON: &str = "session expired";

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Sessions whose records were removed.
    pub retired: Vec<SessionKey>,
    /// Sessions kept because their rollback left resources behind.
    pub partially_rolled_back: Vec<SessionKey>,
    /// Panel records dropped because their category is gone.
    pub panels_untracked: usize,
    /// Tenants whose panels could not be checked this time.
    pub tenants_skipped: usize,
}

/// Expires abandoned sessions and reconciles deployed-panel records.
pub struct CleanupScheduler<C: ResourceClient, S: Store> {
    client: Arc<C>,
    store: Arc<S>,
    cache: Arc<SessionCache>,
    audit: Arc<dyn AuditSink>,
    gate: RollbackGate,
    active: ActiveSessions,
    config: EngineConfig,
}

impl<C: ResourceClient, S: Store> CleanupScheduler<C, S> {
    /// Create a new cleanup scheduler.
    #[must_use]
    pub fn new(
        client: Arc<C>,
        store: Arc<S>,
        cache: Arc<SessionCache>,
        audit: Arc<dyn AuditSink>,
        gate: RollbackGate,
        active: ActiveSessions,
        config: EngineConfig,
    ) -> Self {
        Self {
            client,
            store,
            cache,
            audit,
            gate,
            active,
            config,
        }
    }

    /// Sweep forever at the configured interval.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.cleanup_interval().as_secs(),
            "Starting cleanup loop"
        );

        loop {
            interval.tick().await;
            match self.sweep_once().await {
                Ok(report) => {
                    if report != CleanupReport::default() {
                        tracing::info!(
                            retired = report.retired.len(),
                            partial = report.partially_rolled_back.len(),
                            panels_untracked = report.panels_untracked,
                            tenants_skipped = report.tenants_skipped,
                            "Cleanup sweep finished"
                        );
                    }
                }
                Err(e) => tracing::error!(error = %e, "Cleanup sweep failed, will retry"),
            }
        }
    }

    /// Run one sweep: stale sessions first, then panel records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub async fn sweep_once(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        self.sweep_sessions(&mut report).await?;
        self.sweep_panels(&mut report).await?;
        Ok(report)
    }

    fn is_stale(&self, session: &WizardSession) -> bool {
        let now = Utc::now();
        match session.state {
            SessionState::Created | SessionState::InProgress => {
                session::is_abandoned(session, self.config.inactivity(), now)
                    || session::is_expired(session, now)
            }
            SessionState::Aborted | SessionState::Completed | SessionState::Expired => true,
        }
    }

    async fn sweep_sessions(&self, report: &mut CleanupReport) -> Result<()> {
        for candidate in self.store.list_all_sessions()? {
            if !self.is_stale(&candidate) {
                continue;
            }
            // Claim so a concurrent request can't pick the key up mid-retire
            let Some(_claim) = self.active.try_claim(candidate.key) else {
                continue;
            };

            match self.retire(&candidate.key).await {
                Ok(true) => report.retired.push(candidate.key),
                Ok(false) => report.partially_rolled_back.push(candidate.key),
                Err(e) => {
                    tracing::warn!(session = %candidate.key, error = %e, "Failed to retire session");
                }
            }
        }
        Ok(())
    }

    /// Unwind and remove one stale session.
    ///
    /// Returns `false` if compensation left resources behind; the record is
    /// then kept as `Expired` with the leftover stack so the next sweep
    /// retries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn retire(&self, key: &SessionKey) -> Result<bool> {
        let _gate = self.gate.acquire().await;

        // Re-read under the gate: a failing run may have just unwound it
        let Some(mut session) = self.store.get_session(key)? else {
            return Ok(true);
        };
        // A completed run's resources are the deployment, not leftovers
        if session.state == SessionState::Completed {
            session.rollback_stack.clear();
        }

        let summary = rollback::unwind(
            &*self.client,
            key.tenant_id,
            &mut session.rollback_stack,
            EXPIRY_REASON,
        )
        .await;

        self.audit.record(AuditEvent::new(
            AuditEventType::SessionExpired,
            Some(*key),
            format!("{:?} session retired; {}", session.state, summary.describe()),
        ));

        if summary.fully_succeeded() {
            match self.store.delete_session(key) {
                Ok(()) | Err(StoreError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
            self.cache.remove(key);
            tracing::info!(session = %key, undone = summary.rolled_back.len(), "Retired session");
            return Ok(true);
        }

        let partial = EngineError::RollbackPartialFailure {
            session: *key,
            remaining: session.rollback_stack.len(),
        };
        tracing::error!(session = %key, error = %partial, "Expired session left resources behind");
        self.audit.record(AuditEvent::new(
            AuditEventType::RollbackExecuted,
            Some(*key),
            partial.to_string(),
        ));

        if session.state != SessionState::Expired {
            session::transition(&*self.store, &mut session, SessionState::Expired)?;
        } else {
            session.updated_at = Utc::now();
            self.store.put_session(&session)?;
        }
        self.cache.insert(session);
        Ok(false)
    }

    async fn sweep_panels(&self, report: &mut CleanupReport) -> Result<()> {
        let mut by_tenant: BTreeMap<TenantId, Vec<DeployedPanel>> = BTreeMap::new();
        for panel in self.store.list_all_panels()? {
            by_tenant.entry(panel.tenant_id).or_default().push(panel);
        }

        for (tenant, panels) in by_tenant {
            let live: HashSet<_> = match self.client.list(tenant, ResourceKind::Category).await {
                Ok(categories) => categories.into_iter().map(|c| c.id).collect(),
                Err(e) => {
                    tracing::warn!(tenant = %tenant, error = %e, "Skipping panel check");
                    report.tenants_skipped += 1;
                    continue;
                }
            };

            for panel in panels.into_iter().filter(|p| !live.contains(&p.resource_id)) {
                match self.store.delete_panel(tenant, panel.resource_id) {
                    Ok(()) | Err(StoreError::NotFound) => {}
                    Err(e) => return Err(e.into()),
                }
                report.panels_untracked += 1;
                self.audit.record(AuditEvent::new(
                    AuditEventType::PanelUntracked,
                    Some(panel.deployed_by),
                    format!("panel {:?} ({}) no longer exists", panel.name, panel.resource_id),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::client::mock::MockResourceClient;
    use crate::plan::ReconciliationPlan;
    use crate::types::ProvisionRequest;
    use chrono::Duration;
    use guildforge_core::{Blueprint, InitiatorId, ResourceId};
    use guildforge_store::{RocksStore, RollbackEntry, RollbackOperation};
    use tempfile::TempDir;

    const TENANT: TenantId = TenantId::new(1);

    struct Harness {
        _dir: TempDir,
        client: Arc<MockResourceClient>,
        store: Arc<RocksStore>,
        audit: Arc<MemoryAuditSink>,
        active: ActiveSessions,
        cleanup: CleanupScheduler<MockResourceClient, RocksStore>,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let client = Arc::new(MockResourceClient::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let active = ActiveSessions::new();
        let cleanup = CleanupScheduler::new(
            Arc::clone(&client),
            Arc::clone(&store),
            Arc::new(SessionCache::new()),
            audit.clone(),
            RollbackGate::new(),
            active.clone(),
            EngineConfig::default(),
        );
        Harness {
            _dir: dir,
            client,
            store,
            audit,
            active,
            cleanup,
        }
    }

    fn stale_session(h: &Harness, initiator: u64, created: ResourceId) -> WizardSession {
        let request = ProvisionRequest::new(TENANT, InitiatorId::new(initiator), Blueprint::default());
        let started = Utc::now() - Duration::minutes(45);
        let mut session = session::new_session(
            &request,
            &ReconciliationPlan::default(),
            &EngineConfig::default(),
            started,
        );
        session.state = SessionState::InProgress;
        session.rollback_stack.push(RollbackEntry {
            operation: RollbackOperation::ResourceCreated,
            resource_kind: ResourceKind::Category,
            resource_id: Some(created),
            parent_context_ids: vec![],
            owner: session.key,
            step_id: "category:Support".to_string(),
            prior: None,
            created_at: started,
        });
        h.store.put_session(&session).unwrap();
        session
    }

    #[tokio::test]
    async fn abandoned_session_is_unwound_and_removed() {
        let h = harness();
        let created = h.client.seed(TENANT, ResourceKind::Category, "Support", 0, None);
        let session = stale_session(&h, 2, created);

        let report = h.cleanup.sweep_once().await.unwrap();

        assert_eq!(report.retired, vec![session.key]);
        assert!(h.client.resources(TENANT).is_empty());
        assert!(h.store.get_session(&session.key).unwrap().is_none());
        let expired = h.audit.of_type(AuditEventType::SessionExpired);
        assert_eq!(expired.len(), 1);
        assert!(expired[0].summary.contains(EXPIRY_REASON));
    }

    #[tokio::test]
    async fn fresh_and_active_sessions_are_left_alone() {
        let h = harness();
        let created = h.client.seed(TENANT, ResourceKind::Category, "Support", 0, None);
        let stale = stale_session(&h, 2, created);
        let _claim = h.active.try_claim(stale.key).unwrap();

        let request = ProvisionRequest::new(TENANT, InitiatorId::new(3), Blueprint::default());
        let mut fresh = session::new_session(
            &request,
            &ReconciliationPlan::default(),
            &EngineConfig::default(),
            Utc::now(),
        );
        fresh.state = SessionState::InProgress;
        h.store.put_session(&fresh).unwrap();

        let report = h.cleanup.sweep_once().await.unwrap();

        assert!(report.retired.is_empty());
        assert_eq!(h.store.list_all_sessions().unwrap().len(), 2);
        assert_eq!(h.client.resources(TENANT).len(), 1);
    }

    #[tokio::test]
    async fn partial_rollback_keeps_expired_record() {
        let h = harness();
        let created = h.client.seed(TENANT, ResourceKind::Category, "Support", 0, None);
        h.client.fail_on_delete(created);
        let session = stale_session(&h, 2, created);

        let report = h.cleanup.sweep_once().await.unwrap();

        assert_eq!(report.partially_rolled_back, vec![session.key]);
        let stored = h.store.get_session(&session.key).unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Expired);
        assert_eq!(stored.rollback_stack.len(), 1);

        // Next sweep succeeds once the platform cooperates
        h.client.clear_failures();
        let report = h.cleanup.sweep_once().await.unwrap();
        assert_eq!(report.retired, vec![session.key]);
        assert!(h.store.get_session(&session.key).unwrap().is_none());
    }

    #[tokio::test]
    async fn panels_without_live_category_are_untracked() {
        let h = harness();
        let kept = h.client.seed(TENANT, ResourceKind::Category, "Shop", 0, None);
        let key = SessionKey::new(TENANT, InitiatorId::new(2));
        for (id, name) in [(kept, "Shop"), (ResourceId::new(9999), "Gone")] {
            h.store
                .put_panel(&DeployedPanel {
                    tenant_id: TENANT,
                    resource_id: id,
                    name: name.to_string(),
                    deployed_by: key,
                    deployed_at: Utc::now(),
                })
                .unwrap();
        }

        let report = h.cleanup.sweep_once().await.unwrap();
        assert_eq!(report.panels_untracked, 1);
        let remaining = h.store.list_panels_by_tenant(TENANT).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].resource_id, kept);

        // Idempotent
        let again = h.cleanup.sweep_once().await.unwrap();
        assert_eq!(again.panels_untracked, 0);
        assert_eq!(h.audit.of_type(AuditEventType::PanelUntracked).len(), 1);
    }

    #[tokio::test]
    async fn listing_failure_skips_tenant() {
        let h = harness();
        h.store
            .put_panel(&DeployedPanel {
                tenant_id: TENANT,
                resource_id: ResourceId::new(5),
                name: "Shop".to_string(),
                deployed_by: SessionKey::new(TENANT, InitiatorId::new(2)),
                deployed_at: Utc::now(),
            })
            .unwrap();
        h.client.fail_listing(true);

        let report = h.cleanup.sweep_once().await.unwrap();

        assert_eq!(report.tenants_skipped, 1);
        assert_eq!(h.store.list_all_panels().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_interval_loop_keeps_sweeping() {
        let h = harness();
        let cleanup = CleanupScheduler::new(
            Arc::clone(&h.client),
            Arc::clone(&h.store),
            Arc::new(SessionCache::new()),
            h.audit.clone(),
            RollbackGate::new(),
            h.active.clone(),
            EngineConfig {
                cleanup_interval_secs: 0,
                ..EngineConfig::default()
            },
        );

        let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), cleanup.run()).await;
        assert!(outcome.is_err(), "cleanup loop should still be running");
    }
}
