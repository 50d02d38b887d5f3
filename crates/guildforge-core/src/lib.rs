//! Core types and utilities for guildforge.
//!
//! This crate provides the foundational types used throughout the provisioning engine:
//!
//! - **Identifiers**: Strongly-typed IDs for tenants, initiators, and platform resources
//! - **Resources**: Resource kinds and attribute snapshots shared by the store and engine
//! - **Blueprint**: The declarative desired-state model
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use guildforge_core::{InitiatorId, SessionKey, TenantId};
//!
//! let tenant: TenantId = "1082004417362042911".parse().unwrap();
//! let initiator = InitiatorId::new(42);
//!
//! let key = SessionKey::new(tenant, initiator);
//! assert_eq!(key.to_string(), "1082004417362042911:42");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod blueprint;
pub mod error;
pub mod ids;
pub mod resource;

pub use blueprint::{Blueprint, CategorySpec, ChannelSpec, ResourceSpec, RoleSpec};
pub use error::{CoreError, Result};
pub use ids::{IdError, InitiatorId, ResourceId, SessionKey, TenantId};
pub use resource::{ResourceAttributes, ResourceKind};
