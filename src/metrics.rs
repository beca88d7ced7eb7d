//! Metrics names and helpers for the field encryption library
//!
//! Metrics are recorded through the `metrics` facade; nothing is collected until
//! the application installs a recorder.

use metrics::histogram;
use std::time::Instant;

pub const ENCRYPT: &str = "fle.encrypt";
pub const ENCRYPT_TIME: &str = "fle.encrypt.time";
pub const DECRYPT: &str = "fle.decrypt";
pub const DECRYPT_TIME: &str = "fle.decrypt.time";
pub const DECRYPT_AUTH_FAILED: &str = "fle.decrypt.auth_failed";
pub const KEY_GENERATED: &str = "fle.key.generated";
pub const KEY_ROTATED: &str = "fle.key.rotated";
pub const KEY_ARCHIVED: &str = "fle.key.archived";
pub const KEY_PURGED: &str = "fle.key.purged";
pub const ARCHIVED_KEY_ACCESS: &str = "fle.archived_key.access";
pub const AUDIT_FAILED: &str = "fle.audit.failed";
pub const DURABLE_DIVERGENCE: &str = "fle.key.durable_divergence";

/// Timer for measuring and recording operation duration
#[derive(Debug)]
pub struct Timer {
    /// Name of the histogram metric
    name: &'static str,

    /// Start time of the operation
    start: Instant,
}

impl Timer {
    /// Create a new timer with the given name
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Record the elapsed time
    pub fn observe_duration(&self) {
        histogram!(self.name, self.start.elapsed());
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.observe_duration();
    }
}
