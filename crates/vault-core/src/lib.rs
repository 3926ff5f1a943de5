//! # vault-core
//!
//! Core functionality for a local, password-protected credential vault:
//! - PBKDF2-HMAC-SHA256 key derivation with SHA-256 key verifiers
//! - AES-256-GCM envelope encryption of every stored secret
//! - Credential CRUD and filtering over encrypted records
//! - All-or-nothing re-encryption when the master password changes
//! - Idle-lock sessions with zeroize-on-drop key custody

pub mod clipboard;
pub mod clock;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod meta;
pub mod rotation;
pub mod session;
pub mod settings;
pub mod storage;
mod vault;

pub use clipboard::{ClipboardSink, MemoryClipboard, SecureClipboard};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::{
    CredentialFilter, CredentialStore, CredentialSummary, NewCredential, RevealedCredential,
};
pub use crypto::{decrypt_string, derive_key, encrypt_string, generate_salt, DerivedKey, SecretString};
pub use error::{DecryptError, Result, RotationError, VaultError};
pub use meta::{MasterMeta, MetaStore};
pub use rotation::KeyRotationCoordinator;
pub use session::{LockReason, Session, SessionConfig, SessionState};
pub use settings::{SettingsManager, VaultSettings};
pub use storage::{FileStorage, MemoryStorage, VaultStorage};
pub use vault::{Vault, VaultState};
