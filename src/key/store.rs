use crate::error::{Error, Result};
use crate::key::{KeyInfo, KeyRecord, KeyStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// In-memory index of every known key, keyed by id
#[derive(Debug, Default)]
pub struct KeyStore {
    keys: RwLock<HashMap<Uuid, Arc<KeyRecord>>>,
}

impl KeyStore {
    /// Creates an empty KeyStore
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Arc<KeyRecord>>> {
        self.keys.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Arc<KeyRecord>>> {
        self.keys.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a key, replacing any key with the same id
    pub(crate) fn put(&self, key: Arc<KeyRecord>) {
        self.write().insert(key.id(), key);
    }

    /// Looks up a key by id
    pub fn get(&self, id: &Uuid) -> Option<Arc<KeyRecord>> {
        self.read().get(id).cloned()
    }

    /// Snapshot of every key, in no particular order
    pub fn all(&self) -> Vec<Arc<KeyRecord>> {
        self.read().values().cloned().collect()
    }

    /// Material-free snapshot of every key, taken under one read lock.
    ///
    /// Activation happens under the write lock, so the snapshot never shows two
    /// active keys.
    pub fn infos(&self) -> Vec<KeyInfo> {
        self.read().values().map(|key| key.info()).collect()
    }

    /// Returns the active key, if any
    pub fn find_active(&self) -> Option<Arc<KeyRecord>> {
        Self::active_in(&self.read())
    }

    fn active_in(keys: &HashMap<Uuid, Arc<KeyRecord>>) -> Option<Arc<KeyRecord>> {
        keys.values()
            .find(|key| key.status() == KeyStatus::Active)
            .cloned()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store holds no key
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Next metadata version number
    pub(crate) fn next_version(&self) -> u64 {
        self.read()
            .values()
            .map(|key| key.metadata().version)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Makes `key` the active key and demotes the previous one to `Rotating`.
    ///
    /// Runs under a single write lock, so readers see either the old active key
    /// or the new one, never both and never neither. `key` must be `Pending`.
    /// Returns the demoted key.
    pub(crate) fn swap_active(
        &self,
        key: Arc<KeyRecord>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Arc<KeyRecord>>> {
        let mut keys = self.write();

        if key.status() != KeyStatus::Pending {
            return Err(Error::InvalidKeyState(format!(
                "key {} is {}, only pending keys can be activated",
                key.id(),
                key.status()
            )));
        }

        let previous = Self::active_in(&keys);
        if let Some(previous) = &previous {
            previous.demote(expires_at)?;
        }
        key.activate()?;
        keys.insert(key.id(), key);

        Ok(previous)
    }
}
