//! The self-describing output of one encryption operation
//!
//! Envelopes are persisted by callers alongside their records, so the serialized
//! shape is stable:
//!
//! ```json
//! {
//!   "ciphertext": "<base64>",
//!   "keyId": "0d4e6c9a-...",
//!   "iv": "<base64>",
//!   "tag": "<base64>",
//!   "algorithm": "aes-256-gcm",
//!   "timestamp": "2024-01-01T00:00:00Z"
//! }
//! ```

use crate::crypto::Algorithm;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ciphertext plus everything needed to decrypt it later
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionEnvelope {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    pub key_id: Uuid,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(default, with = "base64_opt", skip_serializing_if = "Option::is_none")]
    pub tag: Option<Vec<u8>>,
    pub algorithm: Algorithm,
    pub timestamp: DateTime<Utc>,
}

impl EncryptionEnvelope {
    /// Serializes the envelope to its stable JSON form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses an envelope from its JSON form.
    ///
    /// Any structural problem (bad base64, malformed key id, unknown algorithm,
    /// missing field) is reported as [`Error::InvalidEnvelope`].
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidEnvelope(e.to_string()))
    }
}

/// Associated data bound into every seal: the hyphenated key id
pub(crate) fn associated_data(key_id: &Uuid) -> Vec<u8> {
    key_id.hyphenated().to_string().into_bytes()
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(de::Error::custom)
    }
}

mod base64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded.as_bytes()).map_err(de::Error::custom))
            .transpose()
    }
}
