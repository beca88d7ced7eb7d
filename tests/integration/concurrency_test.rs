// Concurrent rotation, generation and encryption

use crate::common::{create_service, Backend};
use fieldencryption::{Algorithm, EncryptionConfig, Error, KeyStatus};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task;

const NUM_TASKS: usize = 10;
const OPERATIONS_PER_TASK: usize = 50;
const IV_SAMPLE: usize = 10_000;

#[tokio::test]
async fn test_iv_uniqueness() {
    let service = create_service(EncryptionConfig::new().with_data_operation_audit(false)).await;

    let mut ivs = HashSet::with_capacity(IV_SAMPLE);
    for _ in 0..IV_SAMPLE {
        let envelope = service.encrypt(b"same plaintext").await.unwrap();
        assert!(ivs.insert(envelope.iv), "IV reused under the same key");
    }

    assert_eq!(ivs.len(), IV_SAMPLE);
    assert_eq!(service.get_stats().total_keys, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rotations_leave_one_active_key() {
    let service = Arc::new(create_service(EncryptionConfig::new()).await);

    let handles = (0..NUM_TASKS).map(|_| {
        let service = service.clone();
        task::spawn(async move { service.rotate_keys().await.map(|key| key.id()) })
    });

    let mut ids = HashSet::new();
    for result in join_all(handles).await {
        let id = result.expect("task panicked").expect("rotation failed");
        ids.insert(id);
    }
    assert_eq!(ids.len(), NUM_TASKS);

    let stats = service.get_stats();
    assert_eq!(stats.active_keys, 1);
    assert_eq!(stats.rotating_keys, NUM_TASKS);
    assert_eq!(stats.total_keys, NUM_TASKS + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_observe_two_active_keys() {
    let service = Arc::new(create_service(EncryptionConfig::new()).await);

    let rotator = {
        let service = service.clone();
        task::spawn(async move {
            for _ in 0..OPERATIONS_PER_TASK {
                service.rotate_keys().await.expect("rotation failed");
            }
        })
    };

    let readers = (0..NUM_TASKS).map(|_| {
        let service = service.clone();
        task::spawn(async move {
            for _ in 0..OPERATIONS_PER_TASK {
                assert_eq!(service.get_stats().active_keys, 1);
                assert!(service.lifecycle().get_active_key().is_some());
                task::yield_now().await;
            }
        })
    });

    for result in join_all(readers).await {
        result.expect("reader observed an inconsistent key set");
    }
    rotator.await.expect("rotator panicked");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_encrypt_decrypt_during_rotation() {
    let service = Arc::new(create_service(EncryptionConfig::new()).await);

    let rotator = {
        let service = service.clone();
        task::spawn(async move {
            for _ in 0..NUM_TASKS {
                service.rotate_keys().await.expect("rotation failed");
                task::yield_now().await;
            }
        })
    };

    let workers = (0..NUM_TASKS).map(|worker| {
        let service = service.clone();
        task::spawn(async move {
            for op in 0..OPERATIONS_PER_TASK {
                let plaintext = format!("worker {} record {}", worker, op);
                let envelope = service.encrypt(plaintext.as_bytes()).await.expect("encrypt failed");
                let decrypted = service.decrypt(&envelope).await.expect("decrypt failed");
                assert_eq!(decrypted, plaintext.as_bytes());
            }
        })
    });

    for result in join_all(workers).await {
        result.expect("worker panicked");
    }
    rotator.await.expect("rotator panicked");

    let stats = service.get_stats();
    assert_eq!(stats.total_encryptions, (NUM_TASKS * OPERATIONS_PER_TASK) as u64);
    assert_eq!(stats.total_decryptions, (NUM_TASKS * OPERATIONS_PER_TASK) as u64);

    let usage: u64 = service.keys().iter().map(|info| info.usage_count).sum();
    assert_eq!(usage, 2 * (NUM_TASKS * OPERATIONS_PER_TASK) as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_generation_yields_one_active_key() {
    let backend = Backend::new();
    let service = Arc::new(backend.service(EncryptionConfig::new()).await.unwrap());

    let handles = (0..NUM_TASKS).map(|_| {
        let service = service.clone();
        task::spawn(async move {
            service
                .lifecycle()
                .generate_key(Algorithm::Aes256Gcm)
                .await
                .map(|key| key.status())
        })
    });

    for result in join_all(handles).await {
        let status = result.expect("task panicked").expect("generation failed");
        assert_eq!(status, KeyStatus::Pending);
    }

    let stats = service.get_stats();
    assert_eq!(stats.active_keys, 1);
    assert_eq!(stats.pending_keys, NUM_TASKS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_try_rotate_reports_contention() {
    let service = Arc::new(create_service(EncryptionConfig::new()).await);

    let handles = (0..NUM_TASKS).map(|_| {
        let service = service.clone();
        task::spawn(async move { service.lifecycle().try_rotate_key().await.map(|key| key.id()) })
    });

    let mut rotated = 0;
    for result in join_all(handles).await {
        match result.expect("task panicked") {
            Ok(_) => rotated += 1,
            Err(Error::RotationInProgress) => {}
            Err(err) => panic!("unexpected error: {}", err),
        }
    }

    assert!(rotated >= 1);
    let stats = service.get_stats();
    assert_eq!(stats.active_keys, 1);
    assert_eq!(stats.total_keys, rotated + 1);
}
