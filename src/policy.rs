use crate::crypto::Algorithm;
use crate::error::Result;
use crate::field_policy::FieldRule;
use chrono::{DateTime, Duration, Utc};
use std::time;

/// Default values for EncryptionConfig
pub const DEFAULT_ALGORITHM: &str = "aes-256-gcm";
pub const DEFAULT_GRACE_PERIOD: time::Duration = time::Duration::from_secs(60 * 60 * 24 * 30); // 30 days
pub const DEFAULT_ROTATION_INTERVAL: time::Duration = time::Duration::from_secs(60 * 60 * 24 * 90); // 90 days

/// Configuration for key lifecycle and field encryption.
///
/// Supplied once at construction time; the service never mutates it.
#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    /// Name of the algorithm used for newly generated keys
    pub algorithm: String,

    /// How long a rotated-out key stays in `Rotating` before the sweep archives it
    pub grace_period: time::Duration,

    /// Age after which the active key is due for rotation (zero disables)
    pub rotation_interval: time::Duration,

    /// How long archived keys keep their material before a purge may drop it.
    /// `None` retains archived material indefinitely.
    pub archive_retention: Option<time::Duration>,

    /// Per-field encryption rules
    pub field_rules: Vec<FieldRule>,

    /// Whether to archive expired keys while the service starts
    pub sweep_on_startup: bool,

    /// Whether encrypt/decrypt calls are written to the audit trail
    pub audit_data_operations: bool,

    /// Provenance recorded on generated keys
    pub created_by: Option<String>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            algorithm: DEFAULT_ALGORITHM.to_string(),
            grace_period: DEFAULT_GRACE_PERIOD,
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
            archive_retention: None,
            field_rules: Vec::new(),
            sweep_on_startup: true,
            audit_data_operations: true,
            created_by: None,
        }
    }
}

impl EncryptionConfig {
    /// Creates a new EncryptionConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the algorithm for newly generated keys
    ///
    /// The name is resolved when the service is built; an unsupported name fails
    /// construction with `InvalidAlgorithm`.
    pub fn with_algorithm(mut self, name: impl Into<String>) -> Self {
        self.algorithm = name.into();
        self
    }

    /// Sets the grace period granted to keys leaving `Active`
    ///
    /// # Example
    /// ```
    /// use fieldencryption::policy::EncryptionConfig;
    /// use std::time::Duration;
    ///
    /// let config = EncryptionConfig::new()
    ///     .with_grace_period(Duration::from_secs(60 * 60 * 24 * 7)); // 7 days
    /// ```
    pub fn with_grace_period(mut self, duration: time::Duration) -> Self {
        self.grace_period = duration;
        self
    }

    /// Sets the rotation interval
    pub fn with_rotation_interval(mut self, duration: time::Duration) -> Self {
        self.rotation_interval = duration;
        self
    }

    /// Allows archived key material to be purged once `duration` has passed since archival
    pub fn with_archive_retention(mut self, duration: time::Duration) -> Self {
        self.archive_retention = Some(duration);
        self
    }

    /// Adds a single field rule
    pub fn with_field_rule(mut self, rule: FieldRule) -> Self {
        self.field_rules.push(rule);
        self
    }

    /// Adds several field rules
    pub fn with_field_rules(mut self, rules: impl IntoIterator<Item = FieldRule>) -> Self {
        self.field_rules.extend(rules);
        self
    }

    /// Enables or disables the startup sweep
    pub fn with_sweep_on_startup(mut self, enabled: bool) -> Self {
        self.sweep_on_startup = enabled;
        self
    }

    /// Enables or disables auditing of encrypt/decrypt calls
    pub fn with_data_operation_audit(mut self, enabled: bool) -> Self {
        self.audit_data_operations = enabled;
        self
    }

    /// Sets the creator recorded in generated key metadata
    pub fn with_created_by(mut self, creator: impl Into<String>) -> Self {
        self.created_by = Some(creator.into());
        self
    }

    /// Resolves the configured algorithm name
    pub fn resolve_algorithm(&self) -> Result<Algorithm> {
        self.algorithm.parse()
    }
}

/// Returns `from + period`, saturating at the latest representable instant
pub fn deadline_after(from: DateTime<Utc>, period: time::Duration) -> DateTime<Utc> {
    Duration::from_std(period)
        .ok()
        .and_then(|period| from.checked_add_signed(period))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Checks if a key created at `created` is due for rotation at `now`
pub fn is_rotation_due(created: DateTime<Utc>, interval: time::Duration, now: DateTime<Utc>) -> bool {
    if interval.is_zero() {
        return false;
    }

    deadline_after(created, interval) <= now
}
