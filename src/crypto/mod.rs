//! Cryptographic primitives for the field encryption library
//!
//! Every cipher is driven through the detached AEAD API with an explicit nonce and
//! associated data on both seal and open.

mod aead;
mod algorithm;

pub use aead::{fill_random, generate_key_material, generate_nonce, open, seal, Sealed};
pub use algorithm::{Algorithm, AES256_KEY_SIZE};
