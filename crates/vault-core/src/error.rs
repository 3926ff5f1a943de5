//! Error types for vault-core

use thiserror::Error;

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Authentication or format failure on a ciphertext envelope.
///
/// Carries no detail: a MAC mismatch, a truncated envelope and malformed
/// base64 are indistinguishable to the caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Decryption failed - ciphertext is corrupt or was sealed under another key")]
pub struct DecryptError;

/// Reasons a master key rotation was aborted.
///
/// Every variant guarantees that neither the records nor the verifier changed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RotationError {
    #[error("Old master password is incorrect")]
    WrongOldPassword,

    #[error("Key rotation aborted and rolled back: {0}")]
    PartialFailure(String),
}

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Vault is locked - unlock with the master password first")]
    Locked,

    #[error("Vault is not initialized - set a master password first")]
    NotInitialized,

    #[error("Vault is already initialized")]
    AlreadyInitialized,

    #[error("Invalid master password")]
    InvalidMasterPassword,

    #[error("Too many failed unlock attempts - restart the application")]
    TooManyAttempts,

    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Rotation(#[from] RotationError),

    #[error("Credential not found: {0}")]
    NotFound(i64),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VaultError {
    /// Whether the UI should simply re-prompt the user instead of failing hard.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VaultError::Locked
                | VaultError::InvalidMasterPassword
                | VaultError::Rotation(RotationError::WrongOldPassword)
        )
    }
}
