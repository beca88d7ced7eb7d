use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size of AES-256 key in bytes
pub const AES256_KEY_SIZE: usize = 32;

// All supported ciphers use a 96-bit nonce and a 128-bit tag
pub(crate) const NONCE_SIZE: usize = 12;
pub(crate) const TAG_SIZE: usize = 16;

/// Closed set of authenticated ciphers available for field encryption
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// AES-256 in Galois/Counter Mode
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,

    /// AES-192 in Galois/Counter Mode
    #[serde(rename = "aes-192-gcm")]
    Aes192Gcm,

    /// AES-128 in Galois/Counter Mode
    #[serde(rename = "aes-128-gcm")]
    Aes128Gcm,

    /// ChaCha20 stream cipher with Poly1305 authenticator
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl Algorithm {
    /// Every supported algorithm, in preference order
    pub const ALL: [Algorithm; 4] = [
        Algorithm::Aes256Gcm,
        Algorithm::Aes192Gcm,
        Algorithm::Aes128Gcm,
        Algorithm::ChaCha20Poly1305,
    ];

    /// Canonical name used in configuration and in serialized envelopes
    pub const fn as_str(self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "aes-256-gcm",
            Algorithm::Aes192Gcm => "aes-192-gcm",
            Algorithm::Aes128Gcm => "aes-128-gcm",
            Algorithm::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    /// Length of the key material in bytes
    pub const fn key_size(self) -> usize {
        match self {
            Algorithm::Aes256Gcm | Algorithm::ChaCha20Poly1305 => AES256_KEY_SIZE,
            Algorithm::Aes192Gcm => 24,
            Algorithm::Aes128Gcm => 16,
        }
    }

    /// Length of the per-operation nonce in bytes
    pub const fn nonce_size(self) -> usize {
        NONCE_SIZE
    }

    /// Length of the authentication tag in bytes
    pub const fn tag_size(self) -> usize {
        TAG_SIZE
    }

    /// Whether the cipher authenticates ciphertext and associated data.
    ///
    /// Always true: no unauthenticated legacy mode is offered.
    pub const fn is_aead(self) -> bool {
        true
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        let normalized = name.trim().to_ascii_lowercase();
        Algorithm::ALL
            .into_iter()
            .find(|algorithm| algorithm.as_str() == normalized)
            .ok_or_else(|| Error::InvalidAlgorithm(name.to_string()))
    }
}
