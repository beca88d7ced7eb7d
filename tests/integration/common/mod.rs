// Common fixtures shared by the integration tests

use async_trait::async_trait;
use fieldencryption::{
    kms::StaticKeyManagementService,
    metastore::{InMemoryAuditSink, InMemoryKeyMetastore},
    AuditEntry, AuditSink, EncryptionConfig, EncryptionService, Error, KeyMetastore, PersistedKey,
    Result,
};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const ALICE: &str = "alice@example.com";
pub const BOB: &str = "bob@example.com";
pub const STATIC_KEY: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// Installs a logger once; repeated calls are ignored
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn create_static_kms() -> Arc<StaticKeyManagementService> {
    let key_bytes = hex::decode(STATIC_KEY).expect("Invalid hex key");
    Arc::new(StaticKeyManagementService::new(key_bytes))
}

/// Collaborators that outlive a single service instance, to simulate restarts
pub struct Backend {
    pub metastore: Arc<FlakyMetastore>,
    pub kms: Arc<StaticKeyManagementService>,
    pub audit: Arc<InMemoryAuditSink>,
}

impl Backend {
    pub fn new() -> Self {
        init_logging();
        Self {
            metastore: Arc::new(FlakyMetastore::default()),
            kms: create_static_kms(),
            audit: Arc::new(InMemoryAuditSink::new()),
        }
    }

    pub async fn service(&self, config: EncryptionConfig) -> Result<EncryptionService> {
        EncryptionService::builder()
            .with_config(config)
            .with_metastore(self.metastore.clone())
            .with_kms(self.kms.clone())
            .with_audit_sink(self.audit.clone())
            .build()
            .await
    }
}

pub async fn create_service(config: EncryptionConfig) -> EncryptionService {
    Backend::new()
        .service(config)
        .await
        .expect("Failed to build service")
}

/// In-memory metastore whose saves can be made to fail
#[derive(Debug, Default)]
pub struct FlakyMetastore {
    inner: InMemoryKeyMetastore,
    saves: AtomicUsize,
    // Saves numbered in [start, end) fail
    failing: Mutex<Range<usize>>,
}

impl FlakyMetastore {
    pub fn set_failing(&self, failing: bool) {
        if failing {
            self.fail_saves(0, usize::MAX);
        } else {
            self.fail_saves(0, 0);
        }
    }

    /// Lets the next `skip` saves through, then fails the `count` after them
    pub fn fail_saves(&self, skip: usize, count: usize) {
        let start = self.saves.load(Ordering::SeqCst).saturating_add(skip);
        *self.failing.lock().unwrap() = start..start.saturating_add(count);
    }

    pub fn inner(&self) -> &InMemoryKeyMetastore {
        &self.inner
    }
}

#[async_trait]
impl KeyMetastore for FlakyMetastore {
    async fn load_all_keys(&self) -> Result<Vec<PersistedKey>> {
        self.inner.load_all_keys().await
    }

    async fn save_key(&self, key: &PersistedKey) -> Result<()> {
        let attempt = self.saves.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&attempt) {
            return Err(Error::Metastore("connection refused".to_string()));
        }
        self.inner.save_key(key).await
    }
}

/// Audit sink that rejects every entry
#[derive(Debug, Default)]
pub struct OfflineAuditSink;

#[async_trait]
impl AuditSink for OfflineAuditSink {
    async fn append_audit_entry(&self, _entry: &AuditEntry) -> Result<()> {
        Err(Error::Audit("audit log unavailable".to_string()))
    }
}
