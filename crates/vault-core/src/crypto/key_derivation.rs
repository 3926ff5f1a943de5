//! Password-based key derivation using PBKDF2-HMAC-SHA256
//!
//! The derived key is never stored. What is stored is its verifier,
//! `SHA-256(key)`, which lets a later unlock check a candidate password
//! without keeping the key or the password around.

use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use super::secure_memory::{DerivedKey, KEY_LEN};
use crate::error::{Result, VaultError};

/// Salt length in bytes
pub const SALT_LEN: usize = 16;

/// Verifier length in bytes (SHA-256 output)
pub const VERIFIER_LEN: usize = 32;

/// Default PBKDF2 iteration count
pub const DEFAULT_ITERATIONS: u32 = 200_000;

/// Per-vault random salt
pub type Salt = [u8; SALT_LEN];

/// One-way digest of a derived key
pub type Verifier = [u8; VERIFIER_LEN];

/// Parameters for PBKDF2 key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDerivationParams {
    /// Iteration count (default: 200,000)
    pub iterations: u32,
}

impl Default for KeyDerivationParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// Generate a cryptographically secure random salt
pub fn generate_salt() -> Salt {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit key from a password and the vault salt
///
/// Deterministic: the same password and salt always yield the same key.
pub fn derive_key(password: &str, salt: &Salt, params: Option<KeyDerivationParams>) -> DerivedKey {
    let params = params.unwrap_or_default();

    let mut key_bytes = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, params.iterations, &mut key_bytes);

    let key = DerivedKey::new(key_bytes);
    key_bytes.zeroize();
    key
}

/// Run [`derive_key`] on the blocking pool so a slow derivation never stalls
/// the runtime's timer tasks.
pub async fn derive_key_blocking(
    password: &str,
    salt: Salt,
    params: KeyDerivationParams,
) -> Result<DerivedKey> {
    let password = Zeroizing::new(password.to_string());

    tokio::task::spawn_blocking(move || derive_key(&password, &salt, Some(params)))
        .await
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))
}

/// Compute the verifier stored alongside the salt: `SHA-256(key)`
pub fn verifier(key: &DerivedKey) -> Verifier {
    Sha256::digest(key.as_bytes()).into()
}

/// Check a candidate key against a stored verifier in constant time
pub fn verify_key(key: &DerivedKey, expected: &Verifier) -> bool {
    constant_time_eq(&verifier(key), expected)
}

/// Constant-time comparison to prevent timing attacks
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Cheap parameters so unit tests do not spend seconds in PBKDF2
#[cfg(test)]
pub(crate) const TEST_PARAMS: KeyDerivationParams = KeyDerivationParams { iterations: 1_000 };
