use crate::audit::{AuditEntry, AuditOperation, AuditTrail};
use crate::crypto::Algorithm;
use crate::error::{Error, Result};
use crate::key::{KeyInfo, KeyMetadata, KeyOperation, KeyRecord, KeyStatus, KeyStore, PersistedKey};
use crate::policy::{self, EncryptionConfig};
use crate::{AuditSink, KeyManagementService, KeyMetastore};

use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Owns every key status mutation.
///
/// Generation, rotation, promotion, archival and purge are serialized through a
/// single writer gate, so two callers can never both produce an `Active` key.
/// Each mutation is persisted through the [`KeyMetastore`] before it becomes
/// visible in the in-memory [`KeyStore`]; a failed save leaves the in-memory
/// state untouched.
///
/// Lookups, usage accounting and reads of the active key never take the gate.
#[derive(Debug)]
pub struct KeyLifecycleManager {
    store: KeyStore,
    metastore: Arc<dyn KeyMetastore>,
    kms: Arc<dyn KeyManagementService>,
    audit: AuditTrail,
    config: Arc<EncryptionConfig>,
    default_algorithm: Algorithm,
    gate: Mutex<()>,
    divergences: AtomicU64,
}

impl KeyLifecycleManager {
    /// Creates a manager with an empty store.
    ///
    /// Fails with `InvalidAlgorithm` if the configured algorithm is not supported.
    pub fn new(
        config: Arc<EncryptionConfig>,
        metastore: Arc<dyn KeyMetastore>,
        kms: Arc<dyn KeyManagementService>,
        audit_sink: Option<Arc<dyn AuditSink>>,
    ) -> Result<Self> {
        let default_algorithm = config.resolve_algorithm()?;

        Ok(Self {
            store: KeyStore::new(),
            metastore,
            kms,
            audit: AuditTrail::new(audit_sink),
            config,
            default_algorithm,
            gate: Mutex::new(()),
            divergences: AtomicU64::new(0),
        })
    }

    /// The in-memory key registry
    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    /// Algorithm used by `rotate_key` and for the initial key
    pub fn default_algorithm(&self) -> Algorithm {
        self.default_algorithm
    }

    /// The audit trail mutations are written to
    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// The configuration the manager was built with
    pub fn config(&self) -> &EncryptionConfig {
        &self.config
    }

    /// Number of failed rotations whose rollback could not be persisted.
    ///
    /// Each one left the durable store with more than one `Active` key, which the
    /// next [`load`](Self::load) repairs.
    pub fn durable_divergences(&self) -> u64 {
        self.divergences.load(Ordering::Relaxed)
    }

    /// Warms the store from the metastore, returning the number of keys loaded.
    ///
    /// Material is unwrapped through the key management service. If more than
    /// one key was persisted as `Active` (a rotation interrupted between its two
    /// saves), the newest is kept and the others are demoted to `Rotating` with a
    /// fresh grace period; the repair is persisted.
    pub async fn load(&self) -> Result<usize> {
        let _gate = self.gate.lock().await;

        let persisted = self.metastore.load_all_keys().await?;
        let mut restored = Vec::with_capacity(persisted.len());
        for key in persisted {
            let material = match &key.wrapped_material {
                Some(wrapped) => Some(Zeroizing::new(self.kms.decrypt_key(wrapped).await?)),
                None => None,
            };
            restored.push(Arc::new(KeyRecord::restore(key.info, material)?));
        }

        let mut active: Vec<&Arc<KeyRecord>> = restored
            .iter()
            .filter(|key| key.status() == KeyStatus::Active)
            .collect();
        if active.len() > 1 {
            active.sort_by_key(|key| (key.metadata().version, key.created_at()));
            let kept = active.pop().map_or_else(Uuid::nil, |key| key.id());
            let deadline = policy::deadline_after(Utc::now(), self.config.grace_period);

            for key in active {
                key.demote(deadline)?;
                self.save(key).await?;
                crate::log::durable_state_repaired(&key.id(), &kept);
            }
        }

        let count = restored.len();
        for key in restored {
            self.store.put(key);
        }

        log::debug!("loaded {} keys from metastore", count);
        Ok(count)
    }

    async fn save(&self, key: &KeyRecord) -> Result<()> {
        self.save_info(key, key.info()).await
    }

    // Persists `key` with `info` standing in for its current in-memory state
    async fn save_info(&self, key: &KeyRecord, info: KeyInfo) -> Result<()> {
        let wrapped_material = match key.material_copy() {
            Some(material) => Some(self.kms.encrypt_key(&material).await?),
            None => None,
        };

        self.metastore
            .save_key(&PersistedKey {
                info,
                wrapped_material,
            })
            .await
    }

    async fn audited<T>(&self, entry: AuditEntry, result: Result<T>) -> Result<T> {
        let entry = match &result {
            Ok(_) => entry,
            Err(err) => entry.failed(err),
        };
        self.audit.record(entry).await;
        result
    }

    fn new_key(&self, algorithm: Algorithm, status: KeyStatus, purpose: &str) -> Arc<KeyRecord> {
        let metadata = KeyMetadata {
            created_by: self.config.created_by.clone(),
            purpose: Some(purpose.to_string()),
            version: self.store.next_version(),
            ..KeyMetadata::default()
        };

        Arc::new(KeyRecord::generate(algorithm, status, metadata))
    }

    /// Generates a new key.
    ///
    /// The key is `Active` when no key is active yet, otherwise `Pending` until
    /// promoted with [`promote`](Self::promote).
    pub async fn generate_key(&self, algorithm: Algorithm) -> Result<Arc<KeyRecord>> {
        let _gate = self.gate.lock().await;

        let status = if self.store.find_active().is_some() {
            KeyStatus::Pending
        } else {
            KeyStatus::Active
        };
        let key = self.new_key(algorithm, status, "generate");

        let result = self.save(&key).await;
        let entry = AuditEntry::new(AuditOperation::Generate)
            .with_key(key.id(), algorithm)
            .with_context("status", status);
        self.audited(entry, result).await?;

        self.store.put(key.clone());
        counter!(crate::metrics::KEY_GENERATED, 1);
        log::info!("generated key {} ({}, {})", key.id(), algorithm, status);

        Ok(key)
    }

    /// Rotates to a fresh key using the default algorithm.
    ///
    /// Waits for any in-flight status mutation to finish first.
    pub async fn rotate_key(&self) -> Result<Arc<KeyRecord>> {
        self.rotate_key_with(self.default_algorithm).await
    }

    /// Rotates to a fresh key generated for `algorithm`
    pub async fn rotate_key_with(&self, algorithm: Algorithm) -> Result<Arc<KeyRecord>> {
        let _gate = self.gate.lock().await;
        self.rotate_locked(algorithm).await
    }

    /// Like [`rotate_key`](Self::rotate_key) but fails with `RotationInProgress`
    /// instead of waiting when another status mutation holds the gate
    pub async fn try_rotate_key(&self) -> Result<Arc<KeyRecord>> {
        let _gate = self.gate.try_lock().map_err(|_| Error::RotationInProgress)?;
        self.rotate_locked(self.default_algorithm).await
    }

    async fn rotate_locked(&self, algorithm: Algorithm) -> Result<Arc<KeyRecord>> {
        let key = self.new_key(algorithm, KeyStatus::Pending, "rotate");

        let result = self.activate_locked(&key).await;
        let previous = match &result {
            Ok(Some(previous)) => previous.id().to_string(),
            _ => "none".to_string(),
        };
        let entry = AuditEntry::new(AuditOperation::Rotate)
            .with_key(key.id(), algorithm)
            .with_context("previous", previous);
        self.audited(entry, result).await?;

        counter!(crate::metrics::KEY_ROTATED, 1);
        log::info!("rotated to key {} ({})", key.id(), algorithm);

        Ok(key)
    }

    /// Promotes a `Pending` key to `Active`, demoting the current active key
    /// exactly as a rotation would
    pub async fn promote(&self, id: &Uuid) -> Result<Arc<KeyRecord>> {
        let _gate = self.gate.lock().await;

        let key = self.get_key(id)?;
        let result = if key.status() == KeyStatus::Pending {
            self.activate_locked(&key).await
        } else {
            Err(Error::InvalidKeyState(format!(
                "key {} is {}, only pending keys can be promoted",
                id,
                key.status()
            )))
        };
        let entry = AuditEntry::new(AuditOperation::Promote).with_key(key.id(), key.algorithm());
        self.audited(entry, result).await?;

        log::info!("promoted key {}", id);
        Ok(key)
    }

    // Caller holds the gate. Persists the new active key, then the demoted one,
    // then swaps them in memory in one critical section.
    async fn activate_locked(&self, key: &Arc<KeyRecord>) -> Result<Option<Arc<KeyRecord>>> {
        let deadline = policy::deadline_after(Utc::now(), self.config.grace_period);
        let previous = self.store.find_active();

        let mut info = key.info();
        info.status = KeyStatus::Active;
        info.expires_at = None;
        self.save_info(key, info).await?;

        if let Some(previous) = &previous {
            let mut info = previous.info();
            info.status = KeyStatus::Rotating;
            info.expires_at = Some(deadline);

            if let Err(err) = self.save_info(previous, info).await {
                // Put the new key back to pending so the durable state matches
                // memory. The key stays known as pending either way.
                if let Err(rollback) = self.save(key).await {
                    self.divergences.fetch_add(1, Ordering::Relaxed);
                    counter!(crate::metrics::DURABLE_DIVERGENCE, 1);
                    crate::log::rotation_rollback_failed(&key.id(), &previous.id(), &rollback);
                }
                self.store.put(key.clone());
                return Err(err);
            }
        }

        self.store.swap_active(key.clone(), deadline)
    }

    /// Returns the active key, if any
    pub fn get_active_key(&self) -> Option<Arc<KeyRecord>> {
        self.store.find_active()
    }

    /// Looks up a key by id regardless of status
    pub fn get_key(&self, id: &Uuid) -> Result<Arc<KeyRecord>> {
        self.store
            .get(id)
            .ok_or_else(|| Error::KeyNotFound(id.to_string()))
    }

    /// Counts one successful use of key `id`
    pub fn record_usage(&self, id: &Uuid, operation: KeyOperation) -> Result<()> {
        self.get_key(id)?.record_usage(operation, Utc::now());
        Ok(())
    }

    /// Archives every rotating key whose grace period has ended
    pub async fn sweep_expired(&self) -> Result<usize> {
        self.sweep_expired_at(Utc::now()).await
    }

    /// Archives every rotating key with `expires_at <= now`, returning how many
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let _gate = self.gate.lock().await;

        let mut archived = 0;
        for key in self.store.all() {
            let expires_at = match (key.status(), key.expires_at()) {
                (KeyStatus::Rotating, Some(expires_at)) if expires_at <= now => expires_at,
                _ => continue,
            };

            let mut info = key.info();
            info.status = KeyStatus::Archived;
            let result = match self.save_info(&key, info).await {
                Ok(()) => key.archive(),
                Err(err) => Err(err),
            };
            let entry = AuditEntry::new(AuditOperation::Archive)
                .with_key(key.id(), key.algorithm())
                .with_context("expiresAt", expires_at.to_rfc3339());
            self.audited(entry, result).await?;

            counter!(crate::metrics::KEY_ARCHIVED, 1);
            log::info!("archived key {} (expired {})", key.id(), expires_at);
            archived += 1;
        }

        Ok(archived)
    }

    /// Whether `key` is archived and past the configured retention window
    pub fn is_past_retention(&self, key: &KeyRecord, now: DateTime<Utc>) -> bool {
        match (self.config.archive_retention, key.status(), key.expires_at()) {
            (Some(retention), KeyStatus::Archived, Some(expires_at)) => {
                policy::deadline_after(expires_at, retention) <= now
            }
            _ => false,
        }
    }

    /// Drops the material of archived keys past retention
    pub async fn purge_archived(&self) -> Result<usize> {
        self.purge_archived_at(Utc::now()).await
    }

    /// Drops the material of every archived key whose retention window ended by
    /// `now`. Metadata is kept. Does nothing unless a retention is configured.
    pub async fn purge_archived_at(&self, now: DateTime<Utc>) -> Result<usize> {
        if self.config.archive_retention.is_none() {
            return Ok(0);
        }
        let _gate = self.gate.lock().await;

        let mut purged = 0;
        for key in self.store.all() {
            if key.is_purged() || !self.is_past_retention(&key, now) {
                continue;
            }

            let record = PersistedKey {
                info: key.info(),
                wrapped_material: None,
            };
            let result = match self.metastore.save_key(&record).await {
                Ok(()) => key.purge_material(),
                Err(err) => Err(err),
            };
            let entry = AuditEntry::new(AuditOperation::Purge).with_key(key.id(), key.algorithm());
            if self.audited(entry, result).await? {
                counter!(crate::metrics::KEY_PURGED, 1);
                log::info!("purged material of archived key {}", key.id());
                purged += 1;
            }
        }

        Ok(purged)
    }

    /// Whether the active key has outlived the rotation interval at `now`.
    /// True when there is no active key.
    pub fn is_rotation_due_at(&self, now: DateTime<Utc>) -> bool {
        match self.store.find_active() {
            Some(key) => policy::is_rotation_due(key.created_at(), self.config.rotation_interval, now),
            None => true,
        }
    }

    /// Saves every key so usage counters survive a restart
    pub async fn persist_usage(&self) -> Result<usize> {
        let _gate = self.gate.lock().await;

        let keys = self.store.all();
        for key in &keys {
            self.save(key).await?;
        }

        log::debug!("persisted usage of {} keys", keys.len());
        Ok(keys.len())
    }
}
