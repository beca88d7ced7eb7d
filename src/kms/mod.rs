//! Key Management Service implementations
//!
//! Key material is wrapped by a [`KeyManagementService`](crate::KeyManagementService)
//! before it reaches the metastore. This module provides a static master-key
//! implementation for testing and development; production deployments implement
//! the trait over their KMS or HSM.

mod static_kms;

pub use static_kms::StaticKeyManagementService;
