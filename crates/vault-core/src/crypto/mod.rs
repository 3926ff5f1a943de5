//! Cryptographic primitives for secure credential storage
//!
//! This module provides:
//! - AES-256-GCM envelope encryption
//! - PBKDF2-HMAC-SHA256 key derivation and SHA-256 key verifiers
//! - Secure memory handling with zeroize

mod encryption;
mod key_derivation;
mod secure_memory;

pub use encryption::{
    decrypt, decrypt_string, encrypt, encrypt_string, Envelope, NONCE_LEN, TAG_LEN,
};
pub use key_derivation::{
    derive_key, derive_key_blocking, generate_salt, verifier, verify_key, KeyDerivationParams,
    Salt, Verifier, DEFAULT_ITERATIONS, SALT_LEN, VERIFIER_LEN,
};
pub use secure_memory::{DerivedKey, SecretString, KEY_LEN};

#[cfg(test)]
pub(crate) use key_derivation::TEST_PARAMS;
