//! Reference collaborators for durable key storage and the audit trail
//!
//! - [`InMemoryKeyMetastore`]: a [`KeyMetastore`](crate::KeyMetastore) for tests and development
//! - [`InMemoryAuditSink`]: an [`AuditSink`](crate::AuditSink) that keeps entries in memory
//!
//! Production deployments implement the traits over their own database and
//! append-only log.

pub mod memory;

pub use memory::{InMemoryAuditSink, InMemoryKeyMetastore};
