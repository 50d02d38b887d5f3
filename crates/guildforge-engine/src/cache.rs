//! Read-through cache of session records.
//!
//! The store remains the source of truth; the cache is reloaded from it at
//! startup and written through on every progress update.

use std::collections::HashMap;

use guildforge_core::SessionKey;
use guildforge_store::{Store, WizardSession};
use parking_lot::RwLock;

use crate::error::Result;

/// A cache of wizard sessions keyed by session key.
#[derive(Debug, Default)]
pub struct SessionCache {
    cache: RwLock<HashMap<SessionKey, WizardSession>>,
}

impl SessionCache {
    /// Create a new empty session cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache contents with every session in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn reload<S: Store + ?Sized>(&self, store: &S) -> Result<usize> {
        let sessions = store.list_all_sessions()?;
        let mut cache = self.cache.write();
        cache.clear();
        cache.extend(sessions.into_iter().map(|s| (s.key, s)));
        Ok(cache.len())
    }

    /// Get a session, if cached.
    #[must_use]
    pub fn get(&self, key: &SessionKey) -> Option<WizardSession> {
        self.cache.read().get(key).cloned()
    }

    /// Get a session from the cache, falling back to the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn get_or_load<S: Store + ?Sized>(
        &self,
        store: &S,
        key: &SessionKey,
    ) -> Result<Option<WizardSession>> {
        if let Some(session) = self.get(key) {
            return Ok(Some(session));
        }
        let loaded = store.get_session(key)?;
        if let Some(session) = &loaded {
            self.insert(session.clone());
        }
        Ok(loaded)
    }

    /// Insert or update a session.
    pub fn insert(&self, session: WizardSession) {
        self.cache.write().insert(session.key, session);
    }

    /// Remove a session from the cache.
    pub fn remove(&self, key: &SessionKey) -> Option<WizardSession> {
        self.cache.write().remove(key)
    }

    /// Get the number of cached sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ReconciliationPlan;
    use crate::session::new_session;
    use crate::types::{EngineConfig, ProvisionRequest};
    use chrono::Utc;
    use guildforge_core::{Blueprint, InitiatorId, TenantId};
    use guildforge_store::RocksStore;
    use tempfile::TempDir;

    fn session(initiator: u64) -> WizardSession {
        let request = ProvisionRequest::new(
            TenantId::new(1),
            InitiatorId::new(initiator),
            Blueprint::default(),
        );
        new_session(
            &request,
            &ReconciliationPlan::default(),
            &EngineConfig::default(),
            Utc::now(),
        )
    }

    #[test]
    fn reload_mirrors_store() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        store.put_session(&session(1)).unwrap();
        store.put_session(&session(2)).unwrap();

        let cache = SessionCache::new();
        cache.insert(session(99));
        assert_eq!(cache.reload(&store).unwrap(), 2);
        assert!(cache.get(&session(99).key).is_none());
        assert!(cache.get(&session(1).key).is_some());
    }

    #[test]
    fn get_or_load_falls_back_to_store() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let stored = session(3);
        store.put_session(&stored).unwrap();

        let cache = SessionCache::new();
        assert!(cache.is_empty());
        let loaded = cache.get_or_load(&store, &stored.key).unwrap().unwrap();
        assert_eq!(loaded.key, stored.key);
        assert_eq!(cache.len(), 1);

        cache.remove(&stored.key);
        assert!(cache.is_empty());
    }
}
