//! Checks that must pass before any mutation.

use guildforge_core::{ResourceId, TenantId};
use guildforge_store::Store;

use crate::client::{Capabilities, ResourceClient};
use crate::error::{EngineError, Result};
use crate::plan::ReconciliationPlan;

/// Verify the engine can carry out `plan` in `tenant`.
///
/// Checks, in order: the session store answers, the tenant grants every
/// capability the plan's mutations need, and the origin container exists and
/// is writable.
///
/// # Errors
///
/// Returns `EngineError::Prerequisite` naming the first missing capability.
pub async fn check_prerequisites<C, S>(
    client: &C,
    store: &S,
    tenant: TenantId,
    plan: &ReconciliationPlan,
    origin: Option<ResourceId>,
) -> Result<()>
where
    C: ResourceClient + ?Sized,
    S: Store + ?Sized,
{
    store.ping().map_err(|e| EngineError::Prerequisite {
        capability: format!("session store reachable ({e})"),
    })?;

    if !plan.is_empty() {
        let granted = client
            .capabilities(tenant)
            .await
            .map_err(|e| EngineError::Prerequisite {
                capability: format!("capabilities readable ({e})"),
            })?;

        for kind in plan.mutating_kinds() {
            if !granted.allows(kind) {
                return Err(EngineError::Prerequisite {
                    capability: Capabilities::required_for(kind).to_string(),
                });
            }
        }
    }

    if let Some(container) = origin {
        match client.can_write(tenant, container).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(EngineError::Prerequisite {
                    capability: format!("write access to {container}"),
                })
            }
            Err(e) => {
                return Err(EngineError::Prerequisite {
                    capability: format!("origin {container} reachable ({e})"),
                })
            }
        }
    }

    tracing::debug!(tenant = %tenant, steps = plan.len(), "Prerequisites satisfied");
    Ok(())
}
