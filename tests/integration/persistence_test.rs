// Restarts, metastore failures and audit degradation

use crate::common::{create_static_kms, Backend, OfflineAuditSink, ALICE, BOB};
use fieldencryption::{
    metastore::InMemoryKeyMetastore, EncryptionConfig, EncryptionService, Error, KeyMetastore,
    KeyStatus,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_restart_keeps_every_envelope_readable() {
    let backend = Backend::new();

    let (e1, e2, k2) = {
        let service = backend.service(EncryptionConfig::new()).await.unwrap();
        let e1 = service.encrypt(ALICE.as_bytes()).await.unwrap();
        let k2 = service.rotate_keys().await.unwrap().id();
        let e2 = service.encrypt(BOB.as_bytes()).await.unwrap();
        service.shutdown().await.unwrap();
        (e1, e2, k2)
    };

    let restarted = backend.service(EncryptionConfig::new()).await.unwrap();
    assert_eq!(restarted.lifecycle().get_active_key().map(|k| k.id()), Some(k2));
    assert_eq!(restarted.decrypt(&e1).await.unwrap(), ALICE.as_bytes());
    assert_eq!(restarted.decrypt(&e2).await.unwrap(), BOB.as_bytes());

    // Usage persisted at shutdown carries over
    let stats = restarted.get_stats();
    assert_eq!(stats.total_keys, 2);
    assert_eq!(stats.total_encryptions, 2);
    assert_eq!(stats.total_decryptions, 2);
}

#[tokio::test]
async fn test_persisted_material_is_wrapped() {
    let backend = Backend::new();
    let service = backend.service(EncryptionConfig::new()).await.unwrap();
    let key = service.lifecycle().get_active_key().unwrap();

    let stored = backend
        .metastore
        .inner()
        .get(&key.id())
        .unwrap()
        .expect("key was not persisted");
    let wrapped = stored.wrapped_material.expect("material missing");
    // nonce || ciphertext || tag around a 32-byte key
    assert_eq!(wrapped.len(), 12 + 32 + 16);
    assert_eq!(stored.info.status, KeyStatus::Active);
}

#[tokio::test]
async fn test_startup_sweep_archives_expired_keys() {
    let backend = Backend::new();
    let config = EncryptionConfig::new().with_grace_period(Duration::ZERO);

    let envelope = {
        let service = backend.service(config.clone()).await.unwrap();
        let envelope = service.encrypt(ALICE.as_bytes()).await.unwrap();
        service.rotate_keys().await.unwrap();
        envelope
    };

    let restarted = backend.service(config.clone()).await.unwrap();
    let stats = restarted.get_stats();
    assert_eq!(stats.archived_keys, 1);
    assert_eq!(stats.active_keys, 1);
    assert_eq!(restarted.decrypt(&envelope).await.unwrap(), ALICE.as_bytes());

    let unswept = backend
        .service(config.with_sweep_on_startup(false))
        .await
        .unwrap();
    assert_eq!(unswept.get_stats().archived_keys, 1);
}

#[tokio::test]
async fn test_failed_rotation_keeps_previous_key_active() {
    let backend = Backend::new();
    let service = backend.service(EncryptionConfig::new()).await.unwrap();
    let before = service.lifecycle().get_active_key().unwrap();

    backend.metastore.set_failing(true);
    assert!(matches!(
        service.rotate_keys().await,
        Err(Error::Metastore(_))
    ));
    backend.metastore.set_failing(false);

    assert_eq!(service.lifecycle().get_active_key().map(|k| k.id()), Some(before.id()));
    assert_eq!(before.status(), KeyStatus::Active);
    assert_eq!(service.get_stats().total_keys, 1);

    let last = backend.audit.entries().pop().unwrap();
    assert!(!last.success);

    // Encryption is unaffected
    let envelope = service.encrypt(ALICE.as_bytes()).await.unwrap();
    assert_eq!(envelope.key_id, before.id());
}

#[tokio::test]
async fn test_rotation_rolled_back_when_demotion_save_fails() {
    let backend = Backend::new();
    let service = backend.service(EncryptionConfig::new()).await.unwrap();
    let old = service.lifecycle().get_active_key().unwrap();

    // The new key is saved as active, the demotion of the old one fails
    backend.metastore.fail_saves(1, 1);
    assert!(matches!(
        service.rotate_keys().await,
        Err(Error::Metastore(_))
    ));

    assert_eq!(service.lifecycle().get_active_key().map(|k| k.id()), Some(old.id()));
    let stats = service.get_stats();
    assert_eq!(stats.active_keys, 1);
    assert_eq!(stats.pending_keys, 1);
    assert_eq!(service.health().durable_divergences, 0);

    // The rollback was persisted, so a restart agrees with memory
    let durable: Vec<KeyStatus> = backend
        .metastore
        .inner()
        .load_all_keys()
        .await
        .unwrap()
        .into_iter()
        .map(|key| key.info.status)
        .collect();
    assert_eq!(durable.iter().filter(|s| **s == KeyStatus::Active).count(), 1);
    assert_eq!(durable.iter().filter(|s| **s == KeyStatus::Pending).count(), 1);

    let restarted = backend.service(EncryptionConfig::new()).await.unwrap();
    assert_eq!(restarted.lifecycle().get_active_key().map(|k| k.id()), Some(old.id()));
}

#[tokio::test]
async fn test_unpersisted_rollback_is_reported() {
    let backend = Backend::new();
    let service = backend.service(EncryptionConfig::new()).await.unwrap();
    let old = service.lifecycle().get_active_key().unwrap();

    // Every save after the new active key fails, rollback included
    backend.metastore.fail_saves(1, usize::MAX);
    assert!(matches!(
        service.rotate_keys().await,
        Err(Error::Metastore(_))
    ));
    backend.metastore.set_failing(false);

    // Memory keeps the old key active and the new one pending
    assert_eq!(service.lifecycle().get_active_key().map(|k| k.id()), Some(old.id()));
    assert_eq!(service.get_stats().pending_keys, 1);

    let health = service.health();
    assert_eq!(health.durable_divergences, 1);
    assert!(health.has_active_key);

    let durable_active = backend
        .metastore
        .inner()
        .load_all_keys()
        .await
        .unwrap()
        .into_iter()
        .filter(|key| key.info.status == KeyStatus::Active)
        .count();
    assert_eq!(durable_active, 2);

    // The next load repairs the durable state down to one active key
    let restarted = backend.service(EncryptionConfig::new()).await.unwrap();
    assert_eq!(restarted.get_stats().active_keys, 1);
    assert_eq!(restarted.health().durable_divergences, 0);
}

#[tokio::test]
async fn test_build_fails_when_initial_key_cannot_be_saved() {
    let backend = Backend::new();
    backend.metastore.set_failing(true);

    assert!(matches!(
        backend.service(EncryptionConfig::new()).await,
        Err(Error::Metastore(_))
    ));
}

#[tokio::test]
async fn test_interrupted_rotation_is_repaired_on_load() {
    let backend = Backend::new();
    let service = backend.service(EncryptionConfig::new()).await.unwrap();
    let old = service.lifecycle().get_active_key().unwrap();
    let new = service.rotate_keys().await.unwrap();

    // Simulate a crash between the two saves of a rotation: the demoted key
    // is still persisted as active
    let mut stale = backend.metastore.inner().get(&old.id()).unwrap().unwrap();
    stale.info.status = KeyStatus::Active;
    stale.info.expires_at = None;
    backend.metastore.save_key(&stale).await.unwrap();

    let restarted = backend.service(EncryptionConfig::new()).await.unwrap();
    assert_eq!(restarted.get_stats().active_keys, 1);
    assert_eq!(restarted.lifecycle().get_active_key().map(|k| k.id()), Some(new.id()));
    assert_eq!(
        backend.metastore.inner().get(&old.id()).unwrap().unwrap().info.status,
        KeyStatus::Rotating
    );
}

#[tokio::test]
async fn test_audit_outage_degrades_health_only() {
    let service = EncryptionService::builder()
        .with_metastore(Arc::new(InMemoryKeyMetastore::new()))
        .with_kms(create_static_kms())
        .with_audit_sink(Arc::new(OfflineAuditSink))
        .build()
        .await
        .unwrap();

    let envelope = service.encrypt(ALICE.as_bytes()).await.unwrap();
    assert_eq!(service.decrypt(&envelope).await.unwrap(), ALICE.as_bytes());
    service.rotate_keys().await.unwrap();

    let health = service.health();
    assert!(health.audit_degraded);
    // generate, encrypt, decrypt, rotate
    assert_eq!(health.audit_failures, 4);
    assert!(health.has_active_key);
}

#[tokio::test]
async fn test_wrong_master_key_cannot_load() {
    let backend = Backend::new();
    backend.service(EncryptionConfig::new()).await.unwrap();

    let result = EncryptionService::builder()
        .with_metastore(backend.metastore.clone())
        .with_kms(Arc::new(fieldencryption::kms::StaticKeyManagementService::new(vec![1_u8; 32])))
        .build()
        .await;
    assert!(matches!(result, Err(Error::Kms(_))));
}
