//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary wizard session records, keyed by `tenant_id || initiator_id`.
    pub const SESSIONS: &str = "sessions";

    /// Index: sessions by lifecycle state, keyed by `state || session_key`.
    pub const SESSIONS_BY_STATE: &str = "sessions_by_state";

    /// Deployed panel records, keyed by `tenant_id || resource_id`.
    pub const PANELS: &str = "panels";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::SESSIONS, cf::SESSIONS_BY_STATE, cf::PANELS]
}
