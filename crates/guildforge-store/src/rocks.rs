//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use guildforge_core::{ResourceId, SessionKey, TenantId};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{DeployedPanel, SessionState, WizardSession};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    // Serializes read-then-write of a session and its state index.
    session_writes: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            session_writes: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Scan every value in a column family under a key prefix.
    fn scan_prefix<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        prefix: &[u8],
    ) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut out = Vec::new();
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Stop if we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }

            out.push(Self::deserialize(&value)?);
        }

        Ok(out)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Session Operations
    // =========================================================================

    fn put_session(&self, session: &WizardSession) -> Result<()> {
        let cf_sessions = self.cf(cf::SESSIONS)?;
        let cf_by_state = self.cf(cf::SESSIONS_BY_STATE)?;

        let session_key = keys::session_key(&session.key);
        let state_key = keys::state_session_key(session.state.as_u8(), &session.key);
        let value = Self::serialize(session)?;

        let _guard = self.session_writes.lock();

        // Only the index entry is derived from the old record; the record
        // itself is always the caller's.
        let old_state = self
            .db
            .get_cf(&cf_sessions, &session_key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize::<WizardSession>(&data))
            .transpose()?
            .map(|s| s.state);

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_sessions, &session_key, &value);

        if let Some(old) = old_state {
            if old != session.state {
                let old_state_key = keys::state_session_key(old.as_u8(), &session.key);
                batch.delete_cf(&cf_by_state, &old_state_key);
            }
        }
        batch.put_cf(&cf_by_state, &state_key, []);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::trace!(
            session = %session.key,
            state = ?session.state,
            current_index = session.current_index,
            "Persisted session"
        );

        Ok(())
    }

    fn get_session(&self, key: &SessionKey) -> Result<Option<WizardSession>> {
        let cf = self.cf(cf::SESSIONS)?;

        self.db
            .get_cf(&cf, keys::session_key(key))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn delete_session(&self, key: &SessionKey) -> Result<()> {
        let cf_sessions = self.cf(cf::SESSIONS)?;
        let cf_by_state = self.cf(cf::SESSIONS_BY_STATE)?;

        let _guard = self.session_writes.lock();

        let session = self.get_session(key)?.ok_or(StoreError::NotFound)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_sessions, keys::session_key(key));
        batch.delete_cf(
            &cf_by_state,
            keys::state_session_key(session.state.as_u8(), key),
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn list_sessions_by_state(&self, state: SessionState) -> Result<Vec<WizardSession>> {
        let cf_by_state = self.cf(cf::SESSIONS_BY_STATE)?;
        let prefix = keys::state_prefix(state.as_u8());

        let mut sessions = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_by_state,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }

            let session_key = keys::extract_session_key_from_state_key(&key)?;
            if let Some(session) = self.get_session(&session_key)? {
                sessions.push(session);
            }
        }

        Ok(sessions)
    }

    fn list_all_sessions(&self) -> Result<Vec<WizardSession>> {
        self.scan_prefix(cf::SESSIONS, &[])
    }

    // =========================================================================
    // Deployed Panel Operations
    // =========================================================================

    fn put_panel(&self, panel: &DeployedPanel) -> Result<()> {
        let cf = self.cf(cf::PANELS)?;
        let key = keys::panel_key(panel.tenant_id, panel.resource_id);
        let value = Self::serialize(panel)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn list_panels_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<DeployedPanel>> {
        self.scan_prefix(cf::PANELS, &keys::tenant_prefix(tenant_id))
    }

    fn list_all_panels(&self) -> Result<Vec<DeployedPanel>> {
        self.scan_prefix(cf::PANELS, &[])
    }

    fn delete_panel(&self, tenant_id: TenantId, resource_id: ResourceId) -> Result<()> {
        let cf = self.cf(cf::PANELS)?;
        let key = keys::panel_key(tenant_id, resource_id);

        let exists = self
            .db
            .get_cf(&cf, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        if !exists {
            return Err(StoreError::NotFound);
        }

        self.db
            .delete_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    // =========================================================================
    // Health
    // =========================================================================

    fn ping(&self) -> Result<()> {
        let cf = self.cf(cf::SESSIONS)?;
        self.db
            .get_cf(&cf, b"__ping")
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RollbackEntry, RollbackOperation};
    use chrono::{Duration, Utc};
    use guildforge_core::{Blueprint, InitiatorId, ResourceKind};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn create_test_session(tenant: u64, initiator: u64) -> WizardSession {
        let now = Utc::now();
        WizardSession {
            key: SessionKey::new(TenantId::new(tenant), InitiatorId::new(initiator)),
            state: SessionState::InProgress,
            blueprint: Blueprint::default(),
            origin_channel: None,
            ordered_steps: vec!["role:Staff".to_string(), "category:Support".to_string()],
            current_index: 0,
            completed_steps: BTreeSet::new(),
            rollback_stack: Vec::new(),
            started_at: now,
            updated_at: now,
            expires_at: now + Duration::hours(1),
            last_error: None,
        }
    }

    fn created_entry(owner: SessionKey, id: u64) -> RollbackEntry {
        RollbackEntry {
            operation: RollbackOperation::ResourceCreated,
            resource_kind: ResourceKind::Category,
            resource_id: Some(ResourceId::new(id)),
            parent_context_ids: Vec::new(),
            owner,
            step_id: "category:Support".to_string(),
            prior: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn session_crud() {
        let (store, _dir) = create_test_store();
        let mut session = create_test_session(1, 2);

        // Create
        store.put_session(&session).unwrap();

        // Read
        let retrieved = store.get_session(&session.key).unwrap().unwrap();
        assert_eq!(retrieved.ordered_steps, session.ordered_steps);
        assert_eq!(retrieved.state, SessionState::InProgress);

        // Update progress
        session.current_index = 1;
        session.completed_steps.insert("role:Staff".to_string());
        session.rollback_stack.push(created_entry(session.key, 99));
        store.put_session(&session).unwrap();
        let updated = store.get_session(&session.key).unwrap().unwrap();
        assert_eq!(updated.current_index, 1);
        assert_eq!(updated.rollback_stack.len(), 1);

        // Delete
        store.delete_session(&session.key).unwrap();
        assert!(store.get_session(&session.key).unwrap().is_none());
        assert!(matches!(
            store.delete_session(&session.key),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn upsert_preserves_caller_progress() {
        let (store, _dir) = create_test_store();

        let mut first = create_test_session(1, 2);
        first.current_index = 2;
        first.completed_steps.insert("role:Staff".to_string());
        first.completed_steps.insert("category:Support".to_string());
        store.put_session(&first).unwrap();

        // A second writer for the same key upserts its own snapshot.
        let mut second = create_test_session(1, 2);
        second.current_index = 1;
        second.completed_steps.insert("role:Staff".to_string());
        second.rollback_stack.push(created_entry(second.key, 7));
        store.put_session(&second).unwrap();

        let stored = store.get_session(&second.key).unwrap().unwrap();
        assert_eq!(stored.current_index, 1);
        assert_eq!(stored.completed_steps, second.completed_steps);
        assert_eq!(stored.rollback_stack, second.rollback_stack);
    }

    #[test]
    fn concurrent_upserts_never_reset_progress() {
        let (store, _dir) = create_test_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (1..=8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let mut session = create_test_session(1, 2);
                    session.current_index = i;
                    store.put_session(&session).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stored = store
            .get_session(&SessionKey::new(TenantId::new(1), InitiatorId::new(2)))
            .unwrap()
            .unwrap();
        assert!((1..=8).contains(&stored.current_index));
        assert_eq!(
            store
                .list_sessions_by_state(SessionState::InProgress)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn state_index_updated_on_change() {
        let (store, _dir) = create_test_store();
        let session = create_test_session(1, 2);
        store.put_session(&session).unwrap();

        let mut aborted = session.clone();
        aborted.state = SessionState::Aborted;
        store.put_session(&aborted).unwrap();

        assert!(store
            .list_sessions_by_state(SessionState::InProgress)
            .unwrap()
            .is_empty());
        let aborted = store.list_sessions_by_state(SessionState::Aborted).unwrap();
        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].ordered_steps, session.ordered_steps);
    }

    #[test]
    fn list_sessions_by_state_and_all() {
        let (store, _dir) = create_test_store();

        store.put_session(&create_test_session(1, 1)).unwrap();
        store.put_session(&create_test_session(1, 2)).unwrap();
        let mut completed = create_test_session(2, 1);
        completed.state = SessionState::Completed;
        store.put_session(&completed).unwrap();

        assert_eq!(
            store
                .list_sessions_by_state(SessionState::InProgress)
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            store
                .list_sessions_by_state(SessionState::Completed)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.list_all_sessions().unwrap().len(), 3);
    }

    #[test]
    fn panel_crud() {
        let (store, _dir) = create_test_store();
        let owner = SessionKey::new(TenantId::new(1), InitiatorId::new(2));

        for (tenant, resource) in [(1, 10), (1, 11), (2, 10)] {
            store
                .put_panel(&DeployedPanel {
                    tenant_id: TenantId::new(tenant),
                    resource_id: ResourceId::new(resource),
                    name: format!("panel-{resource}"),
                    deployed_by: owner,
                    deployed_at: Utc::now(),
                })
                .unwrap();
        }

        assert_eq!(store.list_panels_by_tenant(TenantId::new(1)).unwrap().len(), 2);
        assert_eq!(store.list_all_panels().unwrap().len(), 3);

        store
            .delete_panel(TenantId::new(1), ResourceId::new(10))
            .unwrap();
        assert_eq!(store.list_panels_by_tenant(TenantId::new(1)).unwrap().len(), 1);
        assert!(matches!(
            store.delete_panel(TenantId::new(1), ResourceId::new(10)),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn ping_succeeds_on_open_store() {
        let (store, _dir) = create_test_store();
        store.ping().unwrap();
    }
}
