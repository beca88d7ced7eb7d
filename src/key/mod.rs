//! Key records and their lifecycle state machine

pub mod lifecycle;
pub mod store;

use crate::crypto::{self, Algorithm};
use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;
use zeroize::Zeroizing;

pub use lifecycle::KeyLifecycleManager;
pub use store::KeyStore;

/// Lifecycle status of a key.
///
/// The only transitions are `Pending -> Active -> Rotating -> Archived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// Generated while another key was active; not yet promoted
    Pending,
    /// The key used for new encryption
    Active,
    /// Rotated out; decrypts during its grace period
    Rotating,
    /// Past its grace period; never encrypts, still decrypts until purged
    Archived,
}

impl KeyStatus {
    /// Returns true if `self -> next` is a legal transition
    pub fn can_transition_to(self, next: KeyStatus) -> bool {
        matches!(
            (self, next),
            (KeyStatus::Pending, KeyStatus::Active)
                | (KeyStatus::Active, KeyStatus::Rotating)
                | (KeyStatus::Rotating, KeyStatus::Archived)
        )
    }

    /// Whether a key in this status may be selected for new encryption
    pub fn can_encrypt(self) -> bool {
        self != KeyStatus::Archived
    }

    /// Whether keys in this status carry an expiry
    pub fn has_expiry(self) -> bool {
        matches!(self, KeyStatus::Rotating | KeyStatus::Archived)
    }

    /// Lowercase status name
    pub const fn as_str(self) -> &'static str {
        match self {
            KeyStatus::Pending => "pending",
            KeyStatus::Active => "active",
            KeyStatus::Rotating => "rotating",
            KeyStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation that used a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOperation {
    Encrypt,
    Decrypt,
}

/// Provenance of a key; never cryptographically significant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// Sequence number within the store, starting at 1
    pub version: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// Material-free view of a key, safe to log, serialize and return to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub id: Uuid,
    pub algorithm: Algorithm,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub encrypt_count: u64,
    pub decrypt_count: u64,
    pub metadata: KeyMetadata,
}

/// Shape of a key as handed to the durable metastore.
///
/// `wrapped_material` is the key material encrypted by the key management
/// service; it is `None` once the material has been purged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedKey {
    #[serde(flatten)]
    pub info: KeyInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapped_material: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KeyState {
    status: KeyStatus,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct UsageCounters {
    usage: AtomicU64,
    encrypts: AtomicU64,
    decrypts: AtomicU64,
    // Milliseconds since the epoch; 0 means never used
    last_used: AtomicI64,
}

/// A symmetric key and its metadata
pub struct KeyRecord {
    id: Uuid,
    algorithm: Algorithm,
    created_at: DateTime<Utc>,
    metadata: KeyMetadata,
    material: RwLock<Option<Zeroizing<Vec<u8>>>>,
    state: RwLock<KeyState>,
    usage: UsageCounters,
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .field("status", &self.status())
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at())
            .field("material", &"<hidden>")
            .field("usage_count", &self.usage_count())
            .finish()
    }
}

impl KeyRecord {
    /// Generates a new key with fresh random material
    pub(crate) fn generate(algorithm: Algorithm, status: KeyStatus, metadata: KeyMetadata) -> Self {
        debug_assert!(!status.has_expiry());
        Self {
            id: Uuid::new_v4(),
            algorithm,
            created_at: Utc::now(),
            metadata,
            material: RwLock::new(Some(crypto::generate_key_material(algorithm))),
            state: RwLock::new(KeyState {
                status,
                expires_at: None,
            }),
            usage: UsageCounters::default(),
        }
    }

    /// Rebuilds a key from its persisted form and unwrapped material
    pub(crate) fn restore(info: KeyInfo, material: Option<Zeroizing<Vec<u8>>>) -> Result<Self> {
        if info.status.has_expiry() != info.expires_at.is_some() {
            return Err(Error::InvalidKeyState(format!(
                "key {} is {} but expiry is {:?}",
                info.id, info.status, info.expires_at
            )));
        }

        match &material {
            Some(bytes) if bytes.len() != info.algorithm.key_size() => {
                return Err(Error::InvalidKeyState(format!(
                    "key {} has {} bytes of material, {} needs {}",
                    info.id,
                    bytes.len(),
                    info.algorithm,
                    info.algorithm.key_size()
                )));
            }
            None if info.status != KeyStatus::Archived => {
                return Err(Error::InvalidKeyState(format!(
                    "key {} is {} but has no material",
                    info.id, info.status
                )));
            }
            _ => {}
        }

        let last_used = info.last_used_at.map_or(0, |at| at.timestamp_millis());
        Ok(Self {
            id: info.id,
            algorithm: info.algorithm,
            created_at: info.created_at,
            metadata: info.metadata,
            material: RwLock::new(material),
            state: RwLock::new(KeyState {
                status: info.status,
                expires_at: info.expires_at,
            }),
            usage: UsageCounters {
                usage: AtomicU64::new(info.usage_count),
                encrypts: AtomicU64::new(info.encrypt_count),
                decrypts: AtomicU64::new(info.decrypt_count),
                last_used: AtomicI64::new(last_used),
            },
        })
    }

    /// Returns the key ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the algorithm the material was generated for
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Returns the creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the provenance metadata
    pub fn metadata(&self) -> &KeyMetadata {
        &self.metadata
    }

    fn state(&self) -> KeyState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current status
    pub fn status(&self) -> KeyStatus {
        self.state().status
    }

    /// Returns the end of the grace period, set once the key has left `Active`
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.state().expires_at
    }

    /// Number of successful encrypt and decrypt calls that used this key
    pub fn usage_count(&self) -> u64 {
        self.usage.usage.load(Ordering::Acquire)
    }

    /// Number of successful encrypt calls
    pub fn encrypt_count(&self) -> u64 {
        self.usage.encrypts.load(Ordering::Acquire)
    }

    /// Number of successful decrypt calls
    pub fn decrypt_count(&self) -> u64 {
        self.usage.decrypts.load(Ordering::Acquire)
    }

    /// Time of the most recent use
    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        match self.usage.last_used.load(Ordering::Acquire) {
            0 => None,
            millis => Utc.timestamp_millis_opt(millis).single(),
        }
    }

    /// Whether the key material has been purged
    pub fn is_purged(&self) -> bool {
        self.material
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Returns a material-free snapshot
    pub fn info(&self) -> KeyInfo {
        let state = self.state();
        KeyInfo {
            id: self.id,
            algorithm: self.algorithm,
            status: state.status,
            created_at: self.created_at,
            expires_at: state.expires_at,
            last_used_at: self.last_used_at(),
            usage_count: self.usage_count(),
            encrypt_count: self.encrypt_count(),
            decrypt_count: self.decrypt_count(),
            metadata: self.metadata.clone(),
        }
    }

    /// Provides temporary access to the key bytes
    pub(crate) fn with_material<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        let material = self.material.read().unwrap_or_else(PoisonError::into_inner);
        match material.as_ref() {
            Some(bytes) => action(bytes),
            None => Err(Error::KeyNotFound(format!("material for key {} was purged", self.id))),
        }
    }

    /// Copies the key bytes into a buffer that is wiped on drop
    pub(crate) fn material_copy(&self) -> Option<Zeroizing<Vec<u8>>> {
        self.material
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|bytes| Zeroizing::new(bytes.to_vec()))
    }

    /// Drops (and wipes) the key material. Only archived keys can be purged.
    pub(crate) fn purge_material(&self) -> Result<bool> {
        if self.status() != KeyStatus::Archived {
            return Err(Error::InvalidKeyState(format!(
                "key {} is {}, only archived keys can be purged",
                self.id,
                self.status()
            )));
        }
        let mut material = self.material.write().unwrap_or_else(PoisonError::into_inner);
        Ok(material.take().is_some())
    }

    fn transition(&self, next: KeyStatus, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.status.can_transition_to(next) {
            return Err(Error::InvalidKeyState(format!(
                "key {} cannot move from {} to {}",
                self.id, state.status, next
            )));
        }
        state.status = next;
        state.expires_at = expires_at;
        Ok(())
    }

    /// Pending -> Active
    pub(crate) fn activate(&self) -> Result<()> {
        self.transition(KeyStatus::Active, None)
    }

    /// Active -> Rotating, starting the grace period
    pub(crate) fn demote(&self, expires_at: DateTime<Utc>) -> Result<()> {
        self.transition(KeyStatus::Rotating, Some(expires_at))
    }

    /// Rotating -> Archived; the expiry is kept
    pub(crate) fn archive(&self) -> Result<()> {
        let expires_at = self.expires_at();
        self.transition(KeyStatus::Archived, expires_at)
    }

    /// Counts one successful use of the key
    pub(crate) fn record_usage(&self, operation: KeyOperation, now: DateTime<Utc>) {
        self.usage.usage.fetch_add(1, Ordering::AcqRel);
        match operation {
            KeyOperation::Encrypt => self.usage.encrypts.fetch_add(1, Ordering::AcqRel),
            KeyOperation::Decrypt => self.usage.decrypts.fetch_add(1, Ordering::AcqRel),
        };
        self.usage
            .last_used
            .fetch_max(now.timestamp_millis(), Ordering::AcqRel);
    }
}
