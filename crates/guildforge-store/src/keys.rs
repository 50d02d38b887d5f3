//! Key encoding utilities for `RocksDB`.
//!
//! All integers are big-endian so that byte order matches numeric order and
//! prefix scans stay contiguous.

use guildforge_core::{ResourceId, SessionKey, TenantId};

use crate::error::{Result, StoreError};

/// Encode a session key: `tenant_id || initiator_id`.
#[must_use]
pub fn session_key(key: &SessionKey) -> Vec<u8> {
    key.to_bytes().to_vec()
}

/// Encode a state-session index key: `state || tenant_id || initiator_id`.
#[must_use]
pub fn state_session_key(state: u8, key: &SessionKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(17);
    out.push(state);
    out.extend_from_slice(&key.to_bytes());
    out
}

/// Encode a state prefix for scanning all sessions in a given state.
#[must_use]
pub fn state_prefix(state: u8) -> Vec<u8> {
    vec![state]
}

/// Extract the session key from a state-session index key.
///
/// # Errors
///
/// Returns `StoreError::CorruptKey` if the key is not 17 bytes long.
pub fn extract_session_key_from_state_key(key: &[u8]) -> Result<SessionKey> {
    if key.len() != 17 {
        return Err(StoreError::CorruptKey(format!(
            "state index key has {} bytes",
            key.len()
        )));
    }
    SessionKey::from_bytes(&key[1..]).map_err(|e| StoreError::CorruptKey(e.to_string()))
}

/// Encode a panel key: `tenant_id || resource_id`.
#[must_use]
pub fn panel_key(tenant_id: TenantId, resource_id: ResourceId) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&tenant_id.to_be_bytes());
    out.extend_from_slice(&resource_id.to_be_bytes());
    out
}

/// Encode a tenant prefix for scanning all panels of a tenant.
#[must_use]
pub fn tenant_prefix(tenant_id: TenantId) -> Vec<u8> {
    tenant_id.to_be_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use guildforge_core::InitiatorId;

    #[test]
    fn state_session_key_roundtrip() {
        let key = SessionKey::new(TenantId::new(7), InitiatorId::new(9));
        let encoded = state_session_key(2, &key);
        assert_eq!(encoded.len(), 17);
        assert!(encoded.starts_with(&state_prefix(2)));
        assert_eq!(extract_session_key_from_state_key(&encoded).unwrap(), key);
    }

    #[test]
    fn corrupt_state_key_is_rejected() {
        assert!(matches!(
            extract_session_key_from_state_key(&[1, 2, 3]),
            Err(StoreError::CorruptKey(_))
        ));
    }

    #[test]
    fn panel_keys_group_by_tenant() {
        let tenant = TenantId::new(1);
        let a = panel_key(tenant, ResourceId::new(5));
        let b = panel_key(tenant, ResourceId::new(6));
        let other = panel_key(TenantId::new(2), ResourceId::new(5));

        let prefix = tenant_prefix(tenant);
        assert!(a.starts_with(&prefix));
        assert!(b.starts_with(&prefix));
        assert!(!other.starts_with(&prefix));
    }
}
