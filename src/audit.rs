//! Audit trail entries and the fire-and-forget writer around an [`AuditSink`]

use crate::crypto::Algorithm;
use crate::error::Error;
use crate::AuditSink;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Operation recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Generate,
    Rotate,
    Promote,
    Archive,
    Purge,
    Encrypt,
    Decrypt,
}

impl AuditOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            AuditOperation::Generate => "generate",
            AuditOperation::Rotate => "rotate",
            AuditOperation::Promote => "promote",
            AuditOperation::Archive => "archive",
            AuditOperation::Purge => "purge",
            AuditOperation::Encrypt => "encrypt",
            AuditOperation::Decrypt => "decrypt",
        }
    }
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit trail entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub operation: AuditOperation,
    pub key_id: Option<Uuid>,
    pub algorithm: Option<Algorithm>,
    pub success: bool,
    pub context: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Creates a successful entry for `operation`
    pub fn new(operation: AuditOperation) -> Self {
        Self {
            operation,
            key_id: None,
            algorithm: None,
            success: true,
            context: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Sets the key the operation applied to
    pub fn with_key(mut self, key_id: Uuid, algorithm: Algorithm) -> Self {
        self.key_id = Some(key_id);
        self.algorithm = Some(algorithm);
        self
    }

    /// Adds a context value
    pub fn with_context(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(name.into(), value.to_string());
        self
    }

    /// Marks the entry as failed with `err`
    pub fn failed(mut self, err: &Error) -> Self {
        self.success = false;
        self.context.insert("error".to_string(), err.to_string());
        self
    }
}

/// Writes entries to an optional [`AuditSink`], swallowing sink failures.
///
/// A failed append is logged under the security target, counted, and reported
/// through [`AuditTrail::failures`]; it never fails the caller.
#[derive(Debug, Default)]
pub struct AuditTrail {
    sink: Option<Arc<dyn AuditSink>>,
    failures: AtomicU64,
}

impl AuditTrail {
    /// Creates a trail writing to `sink`; `None` disables auditing
    pub fn new(sink: Option<Arc<dyn AuditSink>>) -> Self {
        Self {
            sink,
            failures: AtomicU64::new(0),
        }
    }

    /// Whether a sink is configured
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Appends `entry`
    pub async fn record(&self, entry: AuditEntry) {
        let Some(sink) = &self.sink else {
            return;
        };

        if let Err(err) = sink.append_audit_entry(&entry).await {
            self.failures.fetch_add(1, Ordering::Relaxed);
            counter!(crate::metrics::AUDIT_FAILED, 1);
            crate::log::audit_degraded(entry.operation, &err);
        }
    }

    /// Number of entries the sink rejected
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
