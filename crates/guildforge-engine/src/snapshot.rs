//! Live platform state and the resources that must never be deleted.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use guildforge_core::{ResourceId, ResourceKind, TenantId};

use crate::client::{LiveResource, ResourceClient};
use crate::error::{EngineError, Result};

/// A point-in-time listing of every managed resource kind in a tenant.
#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    /// Roles as listed by the platform.
    pub roles: Vec<LiveResource>,
    /// Categories as listed by the platform.
    pub categories: Vec<LiveResource>,
    /// Channels as listed by the platform.
    pub channels: Vec<LiveResource>,
    /// When the listing was taken.
    pub taken_at: DateTime<Utc>,
}

impl LiveSnapshot {
    /// List roles, categories and channels of `tenant`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::SnapshotUnavailable` if any listing fails.
    pub async fn capture<C: ResourceClient + ?Sized>(client: &C, tenant: TenantId) -> Result<Self> {
        let mut snapshot = Self {
            taken_at: Utc::now(),
            ..Self::default()
        };

        for kind in ResourceKind::ALL {
            let mut listed = client
                .list(tenant, kind)
                .await
                .map_err(EngineError::SnapshotUnavailable)?;
            listed.sort_by_key(|r| (r.position, r.id));
            match kind {
                ResourceKind::Role => snapshot.roles = listed,
                ResourceKind::Category => snapshot.categories = listed,
                ResourceKind::Channel => snapshot.channels = listed,
            }
        }

        tracing::debug!(
            tenant = %tenant,
            roles = snapshot.roles.len(),
            categories = snapshot.categories.len(),
            channels = snapshot.channels.len(),
            "Captured live snapshot"
        );

        Ok(snapshot)
    }

    /// Resources of one kind.
    #[must_use]
    pub fn of_kind(&self, kind: ResourceKind) -> &[LiveResource] {
        match kind {
            ResourceKind::Role => &self.roles,
            ResourceKind::Category => &self.categories,
            ResourceKind::Channel => &self.channels,
        }
    }
}

/// Live resources excluded from matching and deletion.
///
/// Recomputed from a fresh snapshot on every pass.
#[derive(Debug, Clone, Default)]
pub struct ProtectedResourceSet {
    ids: HashSet<ResourceId>,
}

impl ProtectedResourceSet {
    /// Derive the protected set from a snapshot.
    ///
    /// Covers the implicit default role, anything managed by another
    /// integration, the channel hosting progress output and any category
    /// that contains a protected channel.
    #[must_use]
    pub fn compute(snapshot: &LiveSnapshot, progress_channel: Option<ResourceId>) -> Self {
        let mut ids: HashSet<ResourceId> = snapshot
            .roles
            .iter()
            .chain(&snapshot.categories)
            .chain(&snapshot.channels)
            .filter(|r| r.is_default || r.managed_by.is_some())
            .map(|r| r.id)
            .collect();

        if let Some(channel) = progress_channel {
            ids.insert(channel);
        }

        let hosting: Vec<ResourceId> = snapshot
            .channels
            .iter()
            .filter(|c| ids.contains(&c.id))
            .filter_map(|c| c.parent_id)
            .collect();
        ids.extend(hosting);

        Self { ids }
    }

    /// Whether `id` is protected.
    #[must_use]
    pub fn contains(&self, id: ResourceId) -> bool {
        self.ids.contains(&id)
    }

    /// Number of protected resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if nothing is protected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockResourceClient;

    const TENANT: TenantId = TenantId::new(1);

    #[tokio::test]
    async fn capture_sorts_by_position() {
        let client = MockResourceClient::new();
        client.seed(TENANT, ResourceKind::Category, "B", 1, None);
        client.seed(TENANT, ResourceKind::Category, "A", 0, None);

        let snapshot = LiveSnapshot::capture(&client, TENANT).await.unwrap();
        let names: Vec<_> = snapshot.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn capture_failure_is_snapshot_unavailable() {
        let client = MockResourceClient::new();
        client.fail_listing(true);
        let err = LiveSnapshot::capture(&client, TENANT).await.unwrap_err();
        assert!(matches!(err, EngineError::SnapshotUnavailable(_)));
    }

    #[tokio::test]
    async fn protected_set_covers_default_managed_and_progress() {
        let client = MockResourceClient::new();
        let everyone = client.seed_default_role(TENANT);
        let bot = client.seed_managed(TENANT, ResourceKind::Role, "Music Bot", "music");
        let lobby = client.seed(TENANT, ResourceKind::Category, "Lobby", 0, None);
        let setup = client.seed(TENANT, ResourceKind::Channel, "setup", 0, Some(lobby));
        let other = client.seed(TENANT, ResourceKind::Channel, "other", 1, None);

        let snapshot = LiveSnapshot::capture(&client, TENANT).await.unwrap();
        let protected = ProtectedResourceSet::compute(&snapshot, Some(setup));

        assert!(protected.contains(everyone));
        assert!(protected.contains(bot));
        assert!(protected.contains(setup));
        assert!(protected.contains(lobby));
        assert!(!protected.contains(other));
        assert_eq!(protected.len(), 4);
    }
}
