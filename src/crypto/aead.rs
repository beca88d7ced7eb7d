use crate::crypto::Algorithm;
use crate::error::{Error, Result};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::generic_array::typenum::Unsigned;
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, Nonce, Tag};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use chacha20poly1305::ChaCha20Poly1305;
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, Zeroizing};

type Aes192Gcm = AesGcm<Aes192, U12>;

// Maximum message size supported by GCM
// ((1 << 32) - 2) * block size
const GCM_MAX_DATA_SIZE: u64 = ((1 << 32) - 2) * 16;

/// Output of a detached AEAD seal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Ciphertext, same length as the plaintext
    pub ciphertext: Vec<u8>,
    /// Authentication tag over ciphertext and associated data
    pub tag: Vec<u8>,
}

/// Fills a buffer with random bytes using a cryptographically secure RNG
pub fn fill_random(buffer: &mut [u8]) {
    OsRng.fill_bytes(buffer);
}

/// Generates a fresh random nonce for one seal operation
pub fn generate_nonce(algorithm: Algorithm) -> Vec<u8> {
    let mut nonce = vec![0_u8; algorithm.nonce_size()];
    fill_random(&mut nonce);
    nonce
}

/// Generates random key material of the length required by `algorithm`
pub fn generate_key_material(algorithm: Algorithm) -> Zeroizing<Vec<u8>> {
    let mut material = Zeroizing::new(vec![0_u8; algorithm.key_size()]);
    fill_random(material.as_mut_slice());
    material
}

/// Encrypts `plaintext` under `key` with an explicit `nonce`, binding `aad`
pub fn seal(
    algorithm: Algorithm,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Sealed> {
    match algorithm {
        Algorithm::Aes256Gcm => seal_with::<Aes256Gcm>(key, nonce, aad, plaintext),
        Algorithm::Aes192Gcm => seal_with::<Aes192Gcm>(key, nonce, aad, plaintext),
        Algorithm::Aes128Gcm => seal_with::<Aes128Gcm>(key, nonce, aad, plaintext),
        Algorithm::ChaCha20Poly1305 => seal_with::<ChaCha20Poly1305>(key, nonce, aad, plaintext),
    }
}

/// Verifies `tag` and decrypts `ciphertext`.
///
/// Any verification failure yields [`Error::AuthenticationFailed`]; no partial
/// plaintext is ever returned.
pub fn open(
    algorithm: Algorithm,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>> {
    match algorithm {
        Algorithm::Aes256Gcm => open_with::<Aes256Gcm>(key, nonce, aad, ciphertext, tag),
        Algorithm::Aes192Gcm => open_with::<Aes192Gcm>(key, nonce, aad, ciphertext, tag),
        Algorithm::Aes128Gcm => open_with::<Aes128Gcm>(key, nonce, aad, ciphertext, tag),
        Algorithm::ChaCha20Poly1305 => {
            open_with::<ChaCha20Poly1305>(key, nonce, aad, ciphertext, tag)
        }
    }
}

fn cipher_for<C: KeyInit>(key: &[u8]) -> Result<C> {
    C::new_from_slice(key)
        .map_err(|_| Error::Crypto(format!("invalid key length: {} bytes", key.len())))
}

fn check_nonce<C: AeadCore>(nonce: &[u8]) -> Result<()> {
    let expected = <C::NonceSize as Unsigned>::USIZE;
    if nonce.len() != expected {
        return Err(Error::InvalidEnvelope(format!(
            "nonce must be {} bytes, got {}",
            expected,
            nonce.len()
        )));
    }
    Ok(())
}

fn seal_with<C>(key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Sealed>
where
    C: AeadInPlace + KeyInit,
{
    if plaintext.len() as u64 > GCM_MAX_DATA_SIZE {
        return Err(Error::Crypto("Data too large for AEAD".into()));
    }
    check_nonce::<C>(nonce)?;
    let cipher = cipher_for::<C>(key)?;

    let mut buffer = plaintext.to_vec();
    let tag = match cipher.encrypt_in_place_detached(Nonce::<C>::from_slice(nonce), aad, &mut buffer)
    {
        Ok(tag) => tag,
        Err(e) => {
            buffer.zeroize();
            return Err(Error::Crypto(format!("Encryption failed: {}", e)));
        }
    };

    Ok(Sealed {
        ciphertext: buffer,
        tag: tag.to_vec(),
    })
}

fn open_with<C>(key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<Vec<u8>>
where
    C: AeadInPlace + KeyInit,
{
    check_nonce::<C>(nonce)?;
    if tag.len() != <C::TagSize as Unsigned>::USIZE {
        return Err(Error::AuthenticationFailed);
    }
    let cipher = cipher_for::<C>(key)?;

    let mut buffer = ciphertext.to_vec();
    match cipher.decrypt_in_place_detached(
        Nonce::<C>::from_slice(nonce),
        aad,
        &mut buffer,
        Tag::<C>::from_slice(tag),
    ) {
        Ok(()) => Ok(buffer),
        Err(_) => {
            buffer.zeroize();
            Err(Error::AuthenticationFailed)
        }
    }
}
