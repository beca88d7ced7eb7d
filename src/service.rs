//! The public facade: field encryption over the managed key lifecycle

use crate::audit::{AuditEntry, AuditOperation};
use crate::crypto::{self, Algorithm};
use crate::envelope::{associated_data, EncryptionEnvelope};
use crate::error::{Error, Result};
use crate::field_policy::FieldEncryptionPolicy;
use crate::key::{KeyInfo, KeyLifecycleManager, KeyOperation, KeyRecord, KeyStatus};
use crate::metrics::Timer;
use crate::policy::EncryptionConfig;
use crate::{AuditSink, KeyManagementService, KeyMetastore};

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Key and usage totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionStats {
    pub total_keys: usize,
    pub active_keys: usize,
    pub pending_keys: usize,
    pub rotating_keys: usize,
    pub archived_keys: usize,
    pub total_encryptions: u64,
    pub total_decryptions: u64,
}

/// Operational health signals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    /// Whether an active key exists
    pub has_active_key: bool,
    /// True once the audit sink has rejected an entry
    pub audit_degraded: bool,
    /// Number of entries the audit sink rejected
    pub audit_failures: u64,
    /// Failed rotations that left more than one `Active` key in the metastore
    pub durable_divergences: u64,
}

/// Outcome of one [`EncryptionService::maintain`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Keys archived by the sweep
    pub archived: usize,
    /// The new active key, if the rotation interval had elapsed
    pub rotated: Option<Uuid>,
    /// Archived keys whose material was purged
    pub purged: usize,
}

/// Encrypts and decrypts record fields.
///
/// New data is always encrypted under the active key (or the key a field is
/// pinned to). Decryption always uses the key named by the envelope, so data
/// written before a rotation stays readable. The service holds no global state;
/// share it behind an `Arc`.
#[derive(Debug)]
pub struct EncryptionService {
    config: Arc<EncryptionConfig>,
    lifecycle: KeyLifecycleManager,
    field_policy: FieldEncryptionPolicy,
}

/// A builder for EncryptionService
#[derive(Debug, Default)]
pub struct EncryptionServiceBuilder {
    config: Option<EncryptionConfig>,
    metastore: Option<Arc<dyn KeyMetastore>>,
    kms: Option<Arc<dyn KeyManagementService>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl EncryptionServiceBuilder {
    /// Creates a new EncryptionServiceBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration; defaults apply when not set
    pub fn with_config(mut self, config: EncryptionConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the durable key store
    pub fn with_metastore(mut self, metastore: Arc<dyn KeyMetastore>) -> Self {
        self.metastore = Some(metastore);
        self
    }

    /// Sets the key management service that wraps persisted key material
    pub fn with_kms(mut self, kms: Arc<dyn KeyManagementService>) -> Self {
        self.kms = Some(kms);
        self
    }

    /// Sets the audit sink; without one nothing is audited
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Validates the configuration, loads persisted keys and makes sure a key
    /// is active.
    ///
    /// Fails fast with `InvalidAlgorithm` or `InvalidArgument` on bad
    /// configuration, before touching the metastore.
    pub async fn build(self) -> Result<EncryptionService> {
        let config = Arc::new(self.config.unwrap_or_default());
        let metastore = self
            .metastore
            .ok_or_else(|| Error::InvalidArgument("metastore is required".to_string()))?;
        let kms = self
            .kms
            .ok_or_else(|| Error::InvalidArgument("key management service is required".to_string()))?;

        let lifecycle = KeyLifecycleManager::new(config.clone(), metastore, kms, self.audit_sink)?;
        let field_policy =
            FieldEncryptionPolicy::from_rules(config.field_rules.iter().cloned(), lifecycle.default_algorithm())?;

        lifecycle.load().await?;
        if config.sweep_on_startup {
            lifecycle.sweep_expired().await?;
        }
        if lifecycle.get_active_key().is_none() {
            lifecycle.generate_key(lifecycle.default_algorithm()).await?;
        }

        for id in field_policy.pinned_key_ids() {
            if lifecycle.store().get(&id).is_none() {
                crate::log::unknown_pinned_key(&id);
            }
        }

        log::info!(
            "encryption service ready -- keys: {}, field rules: {}",
            lifecycle.store().len(),
            field_policy.len()
        );

        Ok(EncryptionService {
            config,
            lifecycle,
            field_policy,
        })
    }
}

impl EncryptionService {
    /// Creates a builder
    pub fn builder() -> EncryptionServiceBuilder {
        EncryptionServiceBuilder::new()
    }

    /// Encrypts `plaintext` under the active key
    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptionEnvelope> {
        self.encrypt_with(None, plaintext).await
    }

    /// Encrypts a value of `table.field`, honoring the field's pinned key and
    /// algorithm override
    pub async fn encrypt_field(
        &self,
        table: &str,
        field: &str,
        plaintext: &[u8],
    ) -> Result<EncryptionEnvelope> {
        self.encrypt_with(Some((table, field)), plaintext).await
    }

    async fn encrypt_with(
        &self,
        target: Option<(&str, &str)>,
        plaintext: &[u8],
    ) -> Result<EncryptionEnvelope> {
        let _timer = Timer::new(crate::metrics::ENCRYPT_TIME);

        let mut entry = AuditEntry::new(AuditOperation::Encrypt);
        if let Some((table, field)) = target {
            entry = entry.with_context("table", table).with_context("field", field);
        }

        let result = self.seal(target, plaintext);
        if let Ok(envelope) = &result {
            entry = entry.with_key(envelope.key_id, envelope.algorithm);
            counter!(crate::metrics::ENCRYPT, 1);
        }
        self.audit_data(entry, &result).await;

        result
    }

    fn encryption_key(&self, target: Option<(&str, &str)>) -> Result<(Arc<KeyRecord>, Algorithm)> {
        let key = match target {
            Some((table, field)) => self.lifecycle.get_key(&self.get_field_key_id(table, field)?)?,
            None => self.lifecycle.get_active_key().ok_or(Error::NoActiveKey)?,
        };

        if !key.status().can_encrypt() {
            return Err(Error::InvalidKeyState(format!(
                "key {} is {} and cannot encrypt new data",
                key.id(),
                key.status()
            )));
        }

        let algorithm = match target {
            Some((table, field)) => self.field_policy.resolve_algorithm(table, field, key.algorithm()),
            None => key.algorithm(),
        };
        if algorithm.key_size() != key.algorithm().key_size() {
            return Err(Error::InvalidAlgorithm(format!(
                "{} needs a {}-byte key but key {} is {}",
                algorithm,
                algorithm.key_size(),
                key.id(),
                key.algorithm()
            )));
        }

        Ok((key, algorithm))
    }

    fn seal(&self, target: Option<(&str, &str)>, plaintext: &[u8]) -> Result<EncryptionEnvelope> {
        let (key, algorithm) = self.encryption_key(target)?;

        // One fresh nonce per call; never reused with the same key
        let iv = crypto::generate_nonce(algorithm);
        let aad = associated_data(&key.id());
        let sealed =
            key.with_material(|material| crypto::seal(algorithm, material, &iv, &aad, plaintext))?;

        let now = Utc::now();
        key.record_usage(KeyOperation::Encrypt, now);

        Ok(EncryptionEnvelope {
            ciphertext: sealed.ciphertext,
            key_id: key.id(),
            iv,
            tag: Some(sealed.tag),
            algorithm,
            timestamp: now,
        })
    }

    /// Decrypts `envelope` with the key it names, whatever that key's status.
    ///
    /// Fails with `KeyNotFound` when the key is unknown or its material was
    /// purged, and with `AuthenticationFailed` when the ciphertext, tag or key id
    /// do not verify. No plaintext is returned on failure.
    ///
    /// A tampered `key_id` that names no known key fails with `KeyNotFound`, not
    /// `AuthenticationFailed`.
    pub async fn decrypt(&self, envelope: &EncryptionEnvelope) -> Result<Vec<u8>> {
        let _timer = Timer::new(crate::metrics::DECRYPT_TIME);

        let entry = AuditEntry::new(AuditOperation::Decrypt).with_key(envelope.key_id, envelope.algorithm);
        let result = self.open(envelope);
        if result.is_ok() {
            counter!(crate::metrics::DECRYPT, 1);
        }
        self.audit_data(entry, &result).await;

        result
    }

    fn open(&self, envelope: &EncryptionEnvelope) -> Result<Vec<u8>> {
        let key = self.lifecycle.get_key(&envelope.key_id)?;
        let now = Utc::now();

        if self.lifecycle.is_past_retention(&key, now) {
            counter!(crate::metrics::ARCHIVED_KEY_ACCESS, 1);
            crate::log::archived_key_access(&key.id(), key.expires_at());
        }

        let result = match envelope.tag.as_deref() {
            Some(tag) if envelope.algorithm.key_size() == key.algorithm().key_size() => {
                let aad = associated_data(&envelope.key_id);
                key.with_material(|material| {
                    crypto::open(
                        envelope.algorithm,
                        material,
                        &envelope.iv,
                        &aad,
                        &envelope.ciphertext,
                        tag,
                    )
                })
            }
            _ => Err(Error::AuthenticationFailed),
        };

        match result {
            Ok(plaintext) => {
                key.record_usage(KeyOperation::Decrypt, now);
                Ok(plaintext)
            }
            Err(Error::AuthenticationFailed) => {
                counter!(crate::metrics::DECRYPT_AUTH_FAILED, 1);
                crate::log::authentication_failed(&envelope.key_id, envelope.algorithm);
                Err(Error::AuthenticationFailed)
            }
            Err(err) => Err(err),
        }
    }

    /// Decrypts a value of `table.field`.
    ///
    /// Identical to [`decrypt`](Self::decrypt); additionally notes when the value
    /// was written under a key other than the one the field now resolves to.
    pub async fn decrypt_field(
        &self,
        table: &str,
        field: &str,
        envelope: &EncryptionEnvelope,
    ) -> Result<Vec<u8>> {
        let plaintext = self.decrypt(envelope).await?;

        if let Ok(current) = self.get_field_key_id(table, field) {
            if current != envelope.key_id {
                log::debug!(
                    "{}.{} decrypted with key {}, current key is {}; candidate for re-encryption",
                    table,
                    field,
                    envelope.key_id,
                    current
                );
            }
        }

        Ok(plaintext)
    }

    async fn audit_data<T>(&self, entry: AuditEntry, result: &Result<T>) {
        if !self.config.audit_data_operations {
            return;
        }

        let entry = match result {
            Ok(_) => entry,
            Err(err) => entry.failed(err),
        };
        self.lifecycle.audit().record(entry).await;
    }

    /// Whether values of `table.field` must be encrypted
    pub fn should_encrypt_field(&self, table: &str, field: &str) -> bool {
        self.field_policy.should_encrypt(table, field)
    }

    /// The key new values of `table.field` would be encrypted with
    pub fn get_field_key_id(&self, table: &str, field: &str) -> Result<Uuid> {
        match self.lifecycle.get_active_key() {
            Some(active) => Ok(self.field_policy.resolve_key_id(table, field, active.id())),
            None => self
                .field_policy
                .pinned_key_id(table, field)
                .ok_or(Error::NoActiveKey),
        }
    }

    /// Rotates to a fresh active key; previously written data stays readable
    pub async fn rotate_keys(&self) -> Result<Arc<KeyRecord>> {
        self.lifecycle.rotate_key().await
    }

    /// Key counts by status and usage totals
    pub fn get_stats(&self) -> EncryptionStats {
        self.lifecycle
            .store()
            .infos()
            .iter()
            .fold(EncryptionStats::default(), |mut stats, info| {
                stats.total_keys += 1;
                match info.status {
                    KeyStatus::Pending => stats.pending_keys += 1,
                    KeyStatus::Active => stats.active_keys += 1,
                    KeyStatus::Rotating => stats.rotating_keys += 1,
                    KeyStatus::Archived => stats.archived_keys += 1,
                }
                stats.total_encryptions += info.encrypt_count;
                stats.total_decryptions += info.decrypt_count;
                stats
            })
    }

    /// Archives rotating keys whose grace period has ended
    pub async fn sweep_expired(&self) -> Result<usize> {
        self.lifecycle.sweep_expired().await
    }

    /// Purges the material of archived keys past retention
    pub async fn purge_archived(&self) -> Result<usize> {
        self.lifecycle.purge_archived().await
    }

    /// One scheduled maintenance pass: sweep, rotate if due, then purge.
    ///
    /// The service runs no timers of its own; call this from the host's scheduler.
    pub async fn maintain(&self) -> Result<MaintenanceReport> {
        let archived = self.lifecycle.sweep_expired().await?;

        let rotated = if self.lifecycle.is_rotation_due_at(Utc::now()) {
            Some(self.lifecycle.rotate_key().await?.id())
        } else {
            None
        };

        let purged = self.lifecycle.purge_archived().await?;

        Ok(MaintenanceReport {
            archived,
            rotated,
            purged,
        })
    }

    /// Current health signals
    pub fn health(&self) -> ServiceHealth {
        let audit_failures = self.lifecycle.audit().failures();
        ServiceHealth {
            has_active_key: self.lifecycle.get_active_key().is_some(),
            audit_degraded: audit_failures > 0,
            audit_failures,
            durable_divergences: self.lifecycle.durable_divergences(),
        }
    }

    /// Material-free snapshots of every key, oldest first
    pub fn keys(&self) -> Vec<KeyInfo> {
        let mut keys = self.lifecycle.store().infos();
        keys.sort_by_key(|info| info.metadata.version);
        keys
    }

    /// The key lifecycle manager
    pub fn lifecycle(&self) -> &KeyLifecycleManager {
        &self.lifecycle
    }

    /// The resolved field policy
    pub fn field_policy(&self) -> &FieldEncryptionPolicy {
        &self.field_policy
    }

    /// Persists usage counters. The service stays usable afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        let saved = self.lifecycle.persist_usage().await?;
        log::info!("encryption service shut down -- persisted {} keys", saved);
        Ok(())
    }
}
