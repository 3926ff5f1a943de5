//! AES-256-GCM envelope encryption
//!
//! Envelope format: `nonce || ciphertext || tag`
//! - Nonce: 12 bytes (96 bits), fresh from the OS RNG on every call
//! - Ciphertext: same length as the plaintext
//! - Auth tag: 16 bytes (128 bits)
//!
//! At rest the envelope is standard base64 text.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, Zeroizing};

use super::{DerivedKey, SecretString};
use crate::error::{DecryptError, Result, VaultError};

/// Nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// Authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// Self-contained encrypted payload: `nonce || ciphertext+tag`
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    bytes: Vec<u8>,
}

impl Envelope {
    /// Wrap raw envelope bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw envelope bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Parse the base64 storage form
    pub fn from_base64(encoded: &str) -> std::result::Result<Self, DecryptError> {
        STANDARD
            .decode(encoded.trim())
            .map(Self::from_bytes)
            .map_err(|_| DecryptError)
    }

    /// Encode to the base64 storage form
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Encrypt plaintext using AES-256-GCM
///
/// # Arguments
/// * `plaintext` - The data to encrypt
/// * `key` - The 256-bit encryption key
///
/// # Returns
/// An envelope holding the random nonce followed by ciphertext and tag
pub fn encrypt(plaintext: &[u8], key: &DerivedKey) -> Result<Envelope> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    // aes-gcm appends the auth tag to the ciphertext
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    let mut bytes = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    bytes.extend_from_slice(&nonce);
    bytes.extend_from_slice(&ciphertext);

    Ok(Envelope { bytes })
}

/// Encrypt a string and return the base64 storage form
pub fn encrypt_string(plaintext: &str, key: &DerivedKey) -> Result<String> {
    Ok(encrypt(plaintext.as_bytes(), key)?.to_base64())
}

/// Decrypt an envelope using AES-256-GCM
///
/// Fails closed: any authentication or length problem yields the same
/// [`DecryptError`] and no plaintext.
pub fn decrypt(
    envelope: &Envelope,
    key: &DerivedKey,
) -> std::result::Result<Zeroizing<Vec<u8>>, DecryptError> {
    let bytes = envelope.as_bytes();
    if bytes.len() < NONCE_LEN + TAG_LEN {
        return Err(DecryptError);
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| DecryptError)?;
    let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| DecryptError)
}

/// Decrypt from the base64 storage form and return the secret text
pub fn decrypt_string(
    encoded: &str,
    key: &DerivedKey,
) -> std::result::Result<SecretString, DecryptError> {
    let envelope = Envelope::from_base64(encoded)?;
    let mut plaintext = decrypt(&envelope, key)?;

    match String::from_utf8(std::mem::take(&mut *plaintext)) {
        Ok(text) => Ok(SecretString::new(text)),
        Err(e) => {
            e.into_bytes().zeroize();
            Err(DecryptError)
        }
    }
}
