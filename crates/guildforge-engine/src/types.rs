//! Request types and engine configuration.

use std::time::Duration;

use guildforge_core::{Blueprint, InitiatorId, ResourceId, SessionKey, TenantId};
use serde::{Deserialize, Serialize};

/// Request to provision a blueprint into a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Tenant to provision.
    pub tenant_id: TenantId,
    /// Who started the wizard.
    pub initiator_id: InitiatorId,
    /// Desired state (or the subset being provisioned).
    pub blueprint: Blueprint,
    /// Channel the wizard was started from; it hosts progress output and is
    /// never deleted.
    #[serde(default)]
    pub origin_channel: Option<ResourceId>,
}

impl ProvisionRequest {
    /// Create a new request.
    #[must_use]
    pub fn new(tenant_id: TenantId, initiator_id: InitiatorId, blueprint: Blueprint) -> Self {
        Self {
            tenant_id,
            initiator_id,
            blueprint,
            origin_channel: None,
        }
    }

    /// Set the origin channel.
    #[must_use]
    pub fn with_origin(mut self, channel: ResourceId) -> Self {
        self.origin_channel = Some(channel);
        self
    }

    /// The session key this request runs under.
    #[must_use]
    pub const fn session_key(&self) -> SessionKey {
        SessionKey::new(self.tenant_id, self.initiator_id)
    }
}

/// Configuration for the provisioning engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between cleanup sweeps (seconds).
    pub cleanup_interval_secs: u64,
    /// Age since `started_at` after which a session is abandoned (seconds).
    pub session_inactivity_secs: u64,
    /// Lifetime of a session before resumption is refused (seconds).
    pub session_ttl_secs: u64,
    /// Record prior attributes of updates so rollback can restore them.
    pub reversible_updates: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 300,    // 5 minutes
            session_inactivity_secs: 1800, // 30 minutes
            session_ttl_secs: 3600,        // 1 hour
            reversible_updates: false,
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CLEANUP_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.cleanup_interval_secs = n,
                _ => tracing::warn!(value = %val, "Ignoring invalid CLEANUP_INTERVAL_SECS"),
            }
        }
        if let Ok(val) = std::env::var("SESSION_INACTIVITY_SECS") {
            if let Ok(n) = val.parse() {
                config.session_inactivity_secs = n;
            }
        }
        if let Ok(val) = std::env::var("SESSION_TTL_SECS") {
            if let Ok(n) = val.parse() {
                config.session_ttl_secs = n;
            }
        }
        if let Ok(val) = std::env::var("REVERSIBLE_UPDATES") {
            config.reversible_updates = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        config
    }

    /// Interval between cleanup sweeps, never shorter than one second.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    /// Inactivity threshold as a chrono duration.
    #[must_use]
    pub fn inactivity(&self) -> chrono::Duration {
        seconds(self.session_inactivity_secs)
    }

    /// Session lifetime as a chrono duration.
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        seconds(self.session_ttl_secs)
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000);
    chrono::Duration::seconds(secs)
}
