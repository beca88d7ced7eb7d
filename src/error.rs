use thiserror::Error;

/// Result type for fieldencryption operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the fieldencryption library
#[derive(Error, Debug)]
pub enum Error {
    /// Encryption was requested but no key is active
    #[error("No active encryption key")]
    NoActiveKey,

    /// The referenced key is unknown, or its material has been purged
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// AEAD tag verification failed (tampered ciphertext, tag, key id or wrong key)
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// The algorithm is not in the supported set or does not fit the key
    #[error("Invalid algorithm: {0}")]
    InvalidAlgorithm(String),

    /// Another status mutation holds the lifecycle gate
    #[error("Key rotation already in progress")]
    RotationInProgress,

    /// The key is in a status that does not allow the requested operation
    #[error("Invalid key state: {0}")]
    InvalidKeyState(String),

    /// The envelope is structurally malformed
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Invalid argument or configuration value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Errors related to key management service operations
    #[error("KMS error: {0}")]
    Kms(String),

    /// Errors related to metastore operations
    #[error("Metastore error: {0}")]
    Metastore(String),

    /// Errors reported by the audit sink
    #[error("Audit error: {0}")]
    Audit(String),

    /// Errors related to cryptographic operations other than authentication
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Errors related to JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
