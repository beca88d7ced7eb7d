//! Security-relevant logging for the field encryption library
//!
//! Routine lifecycle events go through the `log` facade at `info`/`debug` from the
//! module that produces them. Events that may indicate tampering, misconfiguration
//! or lost observability are emitted here under [`SECURITY_TARGET`] so they can be
//! routed to a dedicated sink. Key material is never formatted.

use crate::audit::AuditOperation;
use crate::crypto::Algorithm;
use crate::error::Error;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Log target for security events
pub const SECURITY_TARGET: &str = "fieldencryption::security";

/// An envelope failed AEAD verification
pub(crate) fn authentication_failed(key_id: &Uuid, algorithm: Algorithm) {
    log::warn!(
        target: SECURITY_TARGET,
        "authentication failed -- key: {}, algorithm: {}; ciphertext, tag or key id may have been tampered with",
        key_id,
        algorithm
    );
}

/// An archived key past its retention window was presented for decryption
pub(crate) fn archived_key_access(key_id: &Uuid, expired_at: Option<DateTime<Utc>>) {
    log::error!(
        target: SECURITY_TARGET,
        "archived key past retention used for decryption -- key: {}, expired: {:?}; data should have been re-encrypted",
        key_id,
        expired_at
    );
}

/// The audit sink rejected an entry
pub(crate) fn audit_degraded(operation: AuditOperation, err: &Error) {
    log::warn!(
        target: SECURITY_TARGET,
        "audit trail degraded -- operation: {}, error: {}",
        operation,
        err
    );
}

/// More than one key was persisted as active; `key_id` was demoted during load
pub(crate) fn durable_state_repaired(key_id: &Uuid, kept: &Uuid) {
    log::warn!(
        target: SECURITY_TARGET,
        "multiple active keys in metastore -- demoted: {}, kept: {}",
        key_id,
        kept
    );
}

/// A rotation failed after saving its new key as active, and saving that key
/// back as pending failed too
pub(crate) fn rotation_rollback_failed(key_id: &Uuid, previous: &Uuid, err: &Error) {
    log::error!(
        target: SECURITY_TARGET,
        "rotation rollback not persisted -- key: {}, still active: {}, error: {}; metastore holds two active keys until the next load",
        key_id,
        previous,
        err
    );
}

/// A field policy pins a key the store does not know
pub(crate) fn unknown_pinned_key(key_id: &Uuid) {
    log::warn!(
        target: SECURITY_TARGET,
        "field policy pins unknown key {}; encryption of those fields will fail until it exists",
        key_id
    );
}
