//! Core identifier types for guildforge.
//!
//! The hosting platform identifies tenants, users, and resources with 64-bit
//! snowflakes. They are rendered as decimal strings on the wire because many
//! JSON consumers cannot represent the full `u64` range.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(u64);

        impl $name {
            /// Create a new identifier from its raw value.
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Return the raw value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Return the big-endian bytes, suitable for ordered storage keys.
            #[must_use]
            pub const fn to_be_bytes(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }

            /// Rebuild an identifier from big-endian bytes.
            #[must_use]
            pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
                Self(u64::from_be_bytes(bytes))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.is_empty() {
                    return Err(IdError::Empty);
                }
                s.parse::<u64>()
                    .map(Self)
                    .map_err(|_| IdError::InvalidSnowflake(s.to_string()))
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

snowflake_id!(
    /// A tenant (guild) on the hosting platform.
    TenantId
);

snowflake_id!(
    /// The user who started a provisioning wizard.
    InitiatorId
);

snowflake_id!(
    /// A live resource (role, category, or channel) on the hosting platform.
    ResourceId
);

/// Identifies a wizard session: one live session per initiator per tenant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// Tenant the session provisions.
    pub tenant_id: TenantId,
    /// User who started the session.
    pub initiator_id: InitiatorId,
}

impl SessionKey {
    /// Create a session key.
    #[must_use]
    pub const fn new(tenant_id: TenantId, initiator_id: InitiatorId) -> Self {
        Self {
            tenant_id,
            initiator_id,
        }
    }

    /// Encode as 16 bytes: `tenant_id || initiator_id`, both big-endian.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.tenant_id.to_be_bytes());
        out[8..].copy_from_slice(&self.initiator_id.to_be_bytes());
        out
    }

    /// Decode from the 16-byte form produced by [`SessionKey::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns `IdError::InvalidLength` if the slice is not 16 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdError> {
        let arr: [u8; 16] = bytes.try_into().map_err(|_| IdError::InvalidLength {
            expected: 16,
            got: bytes.len(),
        })?;
        let mut tenant = [0u8; 8];
        let mut initiator = [0u8; 8];
        tenant.copy_from_slice(&arr[..8]);
        initiator.copy_from_slice(&arr[8..]);
        Ok(Self::new(
            TenantId::from_be_bytes(tenant),
            InitiatorId::from_be_bytes(initiator),
        ))
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({}:{})", self.tenant_id, self.initiator_id)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant_id, self.initiator_id)
    }
}

impl FromStr for SessionKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tenant, initiator) = s
            .split_once(':')
            .ok_or_else(|| IdError::InvalidSessionKey(s.to_string()))?;
        Ok(Self::new(tenant.parse()?, initiator.parse()?))
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The identifier string was empty.
    #[error("empty identifier")]
    Empty,

    /// The identifier is not a valid decimal snowflake.
    #[error("invalid snowflake: {0}")]
    InvalidSnowflake(String),

    /// The session key is not of the form `tenant:initiator`.
    #[error("invalid session key: {0}")]
    InvalidSessionKey(String),

    /// The encoded identifier has the wrong length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes.
        got: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_parse_and_display() {
        let id: ResourceId = "1082004417362042911".parse().unwrap();
        assert_eq!(id.get(), 1_082_004_417_362_042_911);
        assert_eq!(id.to_string(), "1082004417362042911");
    }

    #[test]
    fn snowflake_rejects_garbage() {
        assert_eq!("".parse::<TenantId>(), Err(IdError::Empty));
        assert!(matches!(
            "12ab".parse::<TenantId>(),
            Err(IdError::InvalidSnowflake(_))
        ));
        assert!("-5".parse::<TenantId>().is_err());
    }

    #[test]
    fn snowflake_serializes_as_string() {
        let id = TenantId::new(u64::MAX);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", u64::MAX));

        let back: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn session_key_bytes_preserve_ordering() {
        let a = SessionKey::new(TenantId::new(1), InitiatorId::new(500));
        let b = SessionKey::new(TenantId::new(2), InitiatorId::new(1));
        assert!(a.to_bytes() < b.to_bytes());
        assert_eq!(SessionKey::from_bytes(&a.to_bytes()).unwrap(), a);
    }

    #[test]
    fn session_key_from_bytes_checks_length() {
        assert_eq!(
            SessionKey::from_bytes(&[0u8; 9]),
            Err(IdError::InvalidLength {
                expected: 16,
                got: 9
            })
        );
    }

    #[test]
    fn session_key_parse() {
        let key: SessionKey = "10:20".parse().unwrap();
        assert_eq!(key.tenant_id, TenantId::new(10));
        assert_eq!(key.initiator_id, InitiatorId::new(20));
        assert!("1020".parse::<SessionKey>().is_err());
        assert!("10:x".parse::<SessionKey>().is_err());
    }
}
