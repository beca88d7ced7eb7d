use crate::crypto::{self, Algorithm};
use crate::error::{Error, Result};
use crate::KeyManagementService;
use async_trait::async_trait;
use std::fmt;
use zeroize::Zeroizing;

const WRAP_ALGORITHM: Algorithm = Algorithm::Aes256Gcm;

// Binds wrapped material to this service so it cannot be confused with a field envelope
const WRAP_AAD: &[u8] = b"fieldencryption.kms.static";

/// A static key management service for testing
///
/// Wraps key material with AES-256-GCM under a fixed master key. The wrapped
/// form is `nonce || ciphertext || tag`. Useful for testing, but should not be
/// used in production.
pub struct StaticKeyManagementService {
    /// The static master key
    master_key: Zeroizing<Vec<u8>>,
}

impl StaticKeyManagementService {
    /// Creates a new StaticKeyManagementService with the given master key
    pub fn new(master_key: Vec<u8>) -> Self {
        Self {
            master_key: Zeroizing::new(master_key),
        }
    }
}

impl fmt::Debug for StaticKeyManagementService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeyManagementService")
            .field("master_key", &"<hidden>")
            .finish()
    }
}

#[async_trait]
impl KeyManagementService for StaticKeyManagementService {
    async fn encrypt_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        let nonce = crypto::generate_nonce(WRAP_ALGORITHM);
        let sealed = crypto::seal(WRAP_ALGORITHM, &self.master_key, &nonce, WRAP_AAD, key)
            .map_err(|e| Error::Kms(format!("wrap failed: {}", e)))?;

        let mut wrapped = Vec::with_capacity(nonce.len() + sealed.ciphertext.len() + sealed.tag.len());
        wrapped.extend_from_slice(&nonce);
        wrapped.extend_from_slice(&sealed.ciphertext);
        wrapped.extend_from_slice(&sealed.tag);
        Ok(wrapped)
    }

    async fn decrypt_key(&self, encrypted_key: &[u8]) -> Result<Vec<u8>> {
        let nonce_size = WRAP_ALGORITHM.nonce_size();
        let tag_size = WRAP_ALGORITHM.tag_size();
        if encrypted_key.len() < nonce_size + tag_size {
            return Err(Error::Kms(format!(
                "wrapped key too short: {} bytes",
                encrypted_key.len()
            )));
        }

        let (nonce, rest) = encrypted_key.split_at(nonce_size);
        let (ciphertext, tag) = rest.split_at(rest.len() - tag_size);
        crypto::open(WRAP_ALGORITHM, &self.master_key, nonce, WRAP_AAD, ciphertext, tag)
            .map_err(|e| Error::Kms(format!("unwrap failed: {}", e)))
    }
}
