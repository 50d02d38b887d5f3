//! `RocksDB` storage layer for guildforge.
//!
//! This crate persists provisioning wizard sessions and the panels they deployed,
//! using `RocksDB` column families for indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `sessions`: Primary wizard session records, keyed by `tenant_id || initiator_id`
//! - `sessions_by_state`: Index for listing sessions by lifecycle state
//! - `panels`: Deployed panel records, keyed by `tenant_id || resource_id`
//!
//! # Write contract
//!
//! [`Store::put_session`] is an upsert that writes exactly the record it is
//! given. Progress fields (`current_index`, `completed_steps`,
//! `rollback_stack`) are never replaced by defaults, even when two writers
//! race on the same key.
//!
//! # Example
//!
//! ```no_run
//! use guildforge_store::{RocksStore, SessionState, Store};
//!
//! let store = RocksStore::open("/tmp/guildforge-db").unwrap();
//!
//! // Sessions interrupted by a restart
//! let pending = store.list_sessions_by_state(SessionState::InProgress).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{DeployedPanel, RollbackEntry, RollbackOperation, SessionState, WizardSession};

use guildforge_core::{ResourceId, SessionKey, TenantId};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Session Operations
    // =========================================================================

    /// Insert or update a session record.
    ///
    /// The stored record is exactly `session`; the state index is kept in sync.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_session(&self, session: &WizardSession) -> Result<()>;

    /// Get a session by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_session(&self, key: &SessionKey) -> Result<Option<WizardSession>>;

    /// Delete a session by key.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the session doesn't exist.
    fn delete_session(&self, key: &SessionKey) -> Result<()>;

    /// List all sessions in a given state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_sessions_by_state(&self, state: SessionState) -> Result<Vec<WizardSession>>;

    /// List every session in the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_all_sessions(&self) -> Result<Vec<WizardSession>>;

    // =========================================================================
    // Deployed Panel Operations
    // =========================================================================

    /// Insert or update a deployed panel record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_panel(&self, panel: &DeployedPanel) -> Result<()>;

    /// List the deployed panels of a tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_panels_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<DeployedPanel>>;

    /// List every deployed panel.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_all_panels(&self) -> Result<Vec<DeployedPanel>>;

    /// Stop tracking a deployed panel.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the panel isn't tracked.
    fn delete_panel(&self, tenant_id: TenantId, resource_id: ResourceId) -> Result<()>;

    // =========================================================================
    // Health
    // =========================================================================

    /// Verify the database is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot serve a read.
    fn ping(&self) -> Result<()>;
}
