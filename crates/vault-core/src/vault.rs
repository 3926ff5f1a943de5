//! Main vault orchestration

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clipboard::{ClipboardSink, SecureClipboard};
use crate::credential::CredentialStore;
use crate::crypto::{derive_key_blocking, generate_salt, verifier, verify_key, KeyDerivationParams};
use crate::error::{Result, VaultError};
use crate::meta::MetaStore;
use crate::rotation::KeyRotationCoordinator;
use crate::session::{Session, SessionConfig};
use crate::settings::{SettingsManager, VaultSettings};
use crate::storage::{FileStorage, VaultStorage, WriteGate};

/// Vault state as seen by one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    /// No master password has been set yet
    NotInitialized,
    /// Master password required
    Locked,
    /// Key resident and ready
    Unlocked,
}

/// Entry point tying the master metadata, the credential store, key rotation
/// and a caller-owned [`Session`] together
pub struct Vault {
    storage: Arc<dyn VaultStorage>,
    meta: MetaStore,
    credentials: CredentialStore,
    rotation: KeyRotationCoordinator,
    params: KeyDerivationParams,
    session_config: SessionConfig,
    clipboard_clear_after: Duration,
}

impl Vault {
    /// Open the vault in the default per-user data directory
    pub async fn open_default() -> Result<Self> {
        Self::open_dir(FileStorage::default_dir()?).await
    }

    /// Open the vault file and settings in `dir`
    pub async fn open_dir(dir: PathBuf) -> Result<Self> {
        let settings = SettingsManager::new(&dir).get().clone();
        let storage = FileStorage::open(dir).await?;
        Ok(Self::with_storage(Arc::new(storage), &settings))
    }

    /// Build a vault over any storage backend
    pub fn with_storage(storage: Arc<dyn VaultStorage>, settings: &VaultSettings) -> Self {
        Self::assemble(
            storage,
            KeyDerivationParams::default(),
            settings.session_config(),
            settings.clipboard_clear_after(),
        )
    }

    fn assemble(
        storage: Arc<dyn VaultStorage>,
        params: KeyDerivationParams,
        session_config: SessionConfig,
        clipboard_clear_after: Duration,
    ) -> Self {
        let write_gate: WriteGate = Arc::new(RwLock::new(()));
        debug!(backend = storage.backend_name(), "Vault assembled");

        Self {
            meta: MetaStore::new(storage.clone()),
            credentials: CredentialStore::new(storage.clone(), write_gate.clone()),
            rotation: KeyRotationCoordinator::new(storage.clone(), write_gate, params),
            storage,
            params,
            session_config,
            clipboard_clear_after,
        }
    }

    /// A fresh locked session configured from the vault settings
    pub fn new_session(&self) -> Session {
        Session::new(self.session_config)
    }

    /// Clipboard that clears copied secrets after the configured delay
    pub fn clipboard(&self, sink: Arc<dyn ClipboardSink>) -> SecureClipboard {
        SecureClipboard::new(sink, self.clipboard_clear_after)
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn rotation(&self) -> &KeyRotationCoordinator {
        &self.rotation
    }

    pub fn backend_name(&self) -> &'static str {
        self.storage.backend_name()
    }

    pub async fn is_initialized(&self) -> Result<bool> {
        self.meta.is_initialized().await
    }

    /// Current state for the given session
    pub async fn state(&self, session: &Session) -> Result<VaultState> {
        if !self.is_initialized().await? {
            return Ok(VaultState::NotInitialized);
        }
        Ok(if session.is_unlocked() {
            VaultState::Unlocked
        } else {
            VaultState::Locked
        })
    }

    /// Set the master password of a new vault and unlock the session
    pub async fn initialize(&self, session: &Session, password: &str) -> Result<()> {
        if self.is_initialized().await? {
            return Err(VaultError::AlreadyInitialized);
        }

        info!("Initializing new vault");

        let salt = generate_salt();
        let key = derive_key_blocking(password, salt, self.params).await?;
        self.meta.initialize(salt, verifier(&key)).await?;
        session.admit(key)?;

        info!("Vault initialized successfully");
        Ok(())
    }

    /// Unlock the session with the master password
    ///
    /// A wrong password never replaces a key that is already resident.
    pub async fn unlock(&self, session: &Session, password: &str) -> Result<()> {
        session.ensure_accepting_unlocks()?;

        let meta = self.meta.load().await?.ok_or(VaultError::NotInitialized)?;
        let candidate = derive_key_blocking(password, meta.salt, self.params).await?;

        if !verify_key(&candidate, &meta.verifier) {
            let error = session.record_failed_unlock();
            warn!(attempts = session.failed_unlocks(), "Unlock rejected");
            return Err(error);
        }

        session.admit(candidate)?;
        info!("Vault unlocked successfully");
        Ok(())
    }

    /// Unlock an existing vault, or create it with this password
    ///
    /// Returns `true` if the vault was created by this call.
    pub async fn open(&self, session: &Session, password: &str) -> Result<bool> {
        if self.is_initialized().await? {
            self.unlock(session, password).await?;
            Ok(false)
        } else {
            self.initialize(session, password).await?;
            Ok(true)
        }
    }

    /// Lock the session (discard the resident key)
    pub fn lock(&self, session: &Session) {
        session.lock();
    }

    /// Change the master password, re-encrypting every credential
    pub async fn change_password(
        &self,
        session: &Session,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        self.rotation.rotate(session, old_password, new_password).await
    }
}
