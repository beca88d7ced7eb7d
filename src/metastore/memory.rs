use crate::audit::AuditEntry;
use crate::error::Result;
use crate::key::PersistedKey;
use crate::{AuditSink, KeyMetastore};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use uuid::Uuid;

/// An in-memory implementation of the KeyMetastore trait
///
/// Records are kept as serialized JSON, so a load returns fresh copies exactly as
/// a durable store would. Useful for testing, but keys are lost when the process
/// terminates.
#[derive(Debug, Default)]
pub struct InMemoryKeyMetastore {
    /// Storage for keys: map of key id -> serialized PersistedKey
    store: Arc<RwLock<HashMap<Uuid, String>>>,
}

impl InMemoryKeyMetastore {
    /// Creates a new InMemoryKeyMetastore
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.store.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no key has been stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the stored form of a single key
    pub fn get(&self, id: &Uuid) -> Result<Option<PersistedKey>> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        store
            .get(id)
            .map(|json| serde_json::from_str(json).map_err(Into::into))
            .transpose()
    }
}

#[async_trait]
impl KeyMetastore for InMemoryKeyMetastore {
    async fn load_all_keys(&self) -> Result<Vec<PersistedKey>> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);

        store
            .values()
            .map(|json| serde_json::from_str(json).map_err(Into::into))
            .collect()
    }

    async fn save_key(&self, key: &PersistedKey) -> Result<()> {
        let json = serde_json::to_string(key)?;
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        store.insert(key.info.id, json);

        Ok(())
    }
}

/// An in-memory audit sink that keeps every entry
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    /// Creates a new, empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded entries, oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}
