//! # Field Encryption Library
//!
//! Field-level encryption backed by a managed symmetric key lifecycle.
//!
//! `fieldencryption` encrypts individual record fields (an email, an SSN, a card
//! number) into self-describing envelopes and keeps every envelope decryptable by
//! the exact key that produced it. Keys move through a one-way lifecycle:
//!
//! ```text
//! (none) --generate--> Active --rotate--> Rotating --sweep--> Archived
//!        --generate--> Pending --promote--^
//! ```
//!
//! Only one key is `Active` at a time and only the active key (or a key pinned by
//! field policy) encrypts new data. Rotated keys keep decrypting through their
//! grace period and after archival; archival is not deletion.
//!
//! Durable storage, the audit trail and key wrapping are collaborators supplied
//! by the caller through the [`KeyMetastore`], [`AuditSink`] and
//! [`KeyManagementService`] traits.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use fieldencryption::field_policy::FieldRule;
//! use fieldencryption::kms::StaticKeyManagementService;
//! use fieldencryption::metastore::InMemoryKeyMetastore;
//! use fieldencryption::policy::EncryptionConfig;
//! use fieldencryption::service::EncryptionService;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EncryptionConfig::new()
//!     .with_field_rule(FieldRule::encrypted("users", "email"))
//!     .with_field_rule(FieldRule::plaintext("users", "username"));
//!
//! let master_key = vec![0u8; 32]; // In production, use a real master key
//! let service = EncryptionService::builder()
//!     .with_config(config)
//!     .with_metastore(Arc::new(InMemoryKeyMetastore::new()))
//!     .with_kms(Arc::new(StaticKeyManagementService::new(master_key)))
//!     .build()
//!     .await?;
//!
//! if service.should_encrypt_field("users", "email") {
//!     let envelope = service
//!         .encrypt_field("users", "email", b"alice@example.com")
//!         .await?;
//!     let stored = envelope.to_json()?;
//!
//!     let envelope = fieldencryption::EncryptionEnvelope::from_json(&stored)?;
//!     let plaintext = service.decrypt(&envelope).await?;
//!     assert_eq!(plaintext, b"alice@example.com");
//! }
//!
//! // Administrative rotation; older envelopes keep decrypting
//! service.rotate_keys().await?;
//! service.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod field_policy;
pub mod key;
pub mod kms;
pub mod log;
pub mod metastore;
pub mod metrics;
pub mod policy;
pub mod service;

// Re-export key types
pub use crate::audit::{AuditEntry, AuditOperation};
pub use crate::crypto::{Algorithm, AES256_KEY_SIZE};
pub use crate::envelope::EncryptionEnvelope;
pub use crate::error::{Error, Result};
pub use crate::field_policy::{FieldEncryptionPolicy, FieldRule};
pub use crate::key::{
    KeyInfo, KeyLifecycleManager, KeyMetadata, KeyRecord, KeyStatus, KeyStore, PersistedKey,
};
pub use crate::policy::EncryptionConfig;
pub use crate::service::{EncryptionService, EncryptionStats, ServiceHealth};

use async_trait::async_trait;
use std::fmt;

/// Key Management Service interface for wrapping key material before it is persisted
#[async_trait]
pub trait KeyManagementService: Send + Sync + fmt::Debug {
    /// Encrypts key material using the master key
    async fn encrypt_key(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts key material using the master key
    async fn decrypt_key(&self, encrypted_key: &[u8]) -> Result<Vec<u8>>;
}

/// Durable key-metadata store
#[async_trait]
pub trait KeyMetastore: Send + Sync + fmt::Debug {
    /// Loads every persisted key; used to warm the in-memory store at startup
    async fn load_all_keys(&self) -> Result<Vec<PersistedKey>>;

    /// Inserts or replaces a key by id.
    ///
    /// Called after generation and after every status transition.
    async fn save_key(&self, key: &PersistedKey) -> Result<()>;
}

/// Append-only audit trail
#[async_trait]
pub trait AuditSink: Send + Sync + fmt::Debug {
    /// Appends one entry. Failures degrade observability but never abort the
    /// cryptographic operation being audited.
    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<()>;
}
