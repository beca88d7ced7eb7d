//! Static mapping from `(table, field)` to encryption rules
//!
//! Rules are supplied as a flat list in configuration and resolved once, at
//! startup, into a lookup table. Lookups never allocate and never mutate.

use crate::crypto::Algorithm;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One configured rule for a record field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRule {
    /// Table (or entity) name
    pub table: String,

    /// Field (or column) name
    pub field: String,

    /// Whether values of this field must be encrypted
    pub encrypt: bool,

    /// Algorithm override, by name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,

    /// Pins the field to a specific key instead of the active one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<Uuid>,
}

impl FieldRule {
    /// A rule marking the field as encrypted
    pub fn encrypted(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
            encrypt: true,
            algorithm: None,
            key_id: None,
        }
    }

    /// A rule explicitly marking the field as stored in plaintext
    pub fn plaintext(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            encrypt: false,
            ..Self::encrypted(table, field)
        }
    }

    /// Overrides the algorithm for this field
    pub fn with_algorithm(mut self, name: impl Into<String>) -> Self {
        self.algorithm = Some(name.into());
        self
    }

    /// Pins this field to the given key
    pub fn pinned_to(mut self, key_id: Uuid) -> Self {
        self.key_id = Some(key_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResolvedRule {
    encrypt: bool,
    algorithm: Option<Algorithm>,
    key_id: Option<Uuid>,
}

/// Read-only field encryption policy
#[derive(Debug, Clone, Default)]
pub struct FieldEncryptionPolicy {
    tables: HashMap<String, HashMap<String, ResolvedRule>>,
}

impl FieldEncryptionPolicy {
    /// Creates an empty policy (no field is encrypted)
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves configured rules into a lookup table.
    ///
    /// Fails with `InvalidAlgorithm` for an unknown algorithm name, or for an
    /// override whose key size differs from `default_algorithm` on a field that is
    /// not pinned to a dedicated key. Duplicate `(table, field)` entries fail with
    /// `InvalidArgument`.
    pub fn from_rules(
        rules: impl IntoIterator<Item = FieldRule>,
        default_algorithm: Algorithm,
    ) -> Result<Self> {
        let mut tables: HashMap<String, HashMap<String, ResolvedRule>> = HashMap::new();

        for rule in rules {
            let algorithm = rule
                .algorithm
                .as_deref()
                .map(str::parse::<Algorithm>)
                .transpose()?;

            if let Some(algorithm) = algorithm {
                if rule.key_id.is_none() && algorithm.key_size() != default_algorithm.key_size() {
                    return Err(Error::InvalidAlgorithm(format!(
                        "{} on {}.{} needs a {}-byte key but {} keys are {} bytes",
                        algorithm,
                        rule.table,
                        rule.field,
                        algorithm.key_size(),
                        default_algorithm,
                        default_algorithm.key_size()
                    )));
                }
            }

            let fields = tables.entry(rule.table.clone()).or_default();
            if fields.contains_key(&rule.field) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate field rule for {}.{}",
                    rule.table, rule.field
                )));
            }

            fields.insert(
                rule.field,
                ResolvedRule {
                    encrypt: rule.encrypt,
                    algorithm,
                    key_id: rule.key_id,
                },
            );
        }

        Ok(Self { tables })
    }

    fn rule(&self, table: &str, field: &str) -> Option<&ResolvedRule> {
        self.tables.get(table).and_then(|fields| fields.get(field))
    }

    /// Whether values of `table.field` must be encrypted; unknown fields are not
    pub fn should_encrypt(&self, table: &str, field: &str) -> bool {
        self.rule(table, field).is_some_and(|rule| rule.encrypt)
    }

    /// The key `table.field` is pinned to, if any
    pub fn pinned_key_id(&self, table: &str, field: &str) -> Option<Uuid> {
        self.rule(table, field).and_then(|rule| rule.key_id)
    }

    /// The pinned key for `table.field`, or `current_active`
    pub fn resolve_key_id(&self, table: &str, field: &str, current_active: Uuid) -> Uuid {
        self.pinned_key_id(table, field).unwrap_or(current_active)
    }

    /// The algorithm override for `table.field`, or `default`
    pub fn resolve_algorithm(&self, table: &str, field: &str, default: Algorithm) -> Algorithm {
        self.rule(table, field)
            .and_then(|rule| rule.algorithm)
            .unwrap_or(default)
    }

    /// Key ids pinned by any rule
    pub fn pinned_key_ids(&self) -> Vec<Uuid> {
        self.tables
            .values()
            .flat_map(|fields| fields.values())
            .filter_map(|rule| rule.key_id)
            .collect()
    }

    /// Names of the encrypted fields of `table`, sorted
    pub fn encrypted_fields(&self, table: &str) -> Vec<&str> {
        let mut fields: Vec<&str> = self
            .tables
            .get(table)
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(_, rule)| rule.encrypt)
                    .map(|(name, _)| name.as_str())
                    .collect()
            })
            .unwrap_or_default();
        fields.sort_unstable();
        fields
    }

    /// Number of configured rules
    pub fn len(&self) -> usize {
        self.tables.values().map(HashMap::len).sum()
    }

    /// Whether no rule is configured
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
