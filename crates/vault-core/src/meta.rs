//! Master password metadata: the vault's salt and key verifier
//!
//! Exactly one record exists per vault. The salt is fixed when the vault is
//! created; only rotation replaces the verifier.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::{debug, info};

use crate::crypto::{Salt, Verifier, SALT_LEN, VERIFIER_LEN};
use crate::error::{Result, VaultError};
use crate::storage::{MetaRow, VaultStorage};

/// Decoded `meta` record
#[derive(Clone, PartialEq, Eq)]
pub struct MasterMeta {
    pub salt: Salt,
    pub verifier: Verifier,
}

impl MasterMeta {
    fn from_row(row: &MetaRow) -> Result<Self> {
        Ok(Self {
            salt: decode_fixed::<SALT_LEN>(&row.salt, "salt")?,
            verifier: decode_fixed::<VERIFIER_LEN>(&row.verifier, "verifier")?,
        })
    }

    fn to_row(&self) -> MetaRow {
        MetaRow {
            salt: STANDARD.encode(self.salt),
            verifier: encode_verifier(&self.verifier),
        }
    }
}

impl std::fmt::Debug for MasterMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterMeta")
            .field("salt", &"[REDACTED]")
            .field("verifier", &"[REDACTED]")
            .finish()
    }
}

/// Storage form of a verifier
pub(crate) fn encode_verifier(verifier: &Verifier) -> String {
    STANDARD.encode(verifier)
}

fn decode_fixed<const N: usize>(encoded: &str, field: &str) -> Result<[u8; N]> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| VaultError::Storage(format!("corrupt meta {}: {}", field, e)))?;

    bytes.as_slice().try_into().map_err(|_| {
        VaultError::Storage(format!(
            "corrupt meta {}: expected {} bytes, got {}",
            field,
            N,
            bytes.len()
        ))
    })
}

/// Reads and writes the single `meta` record
#[derive(Clone)]
pub struct MetaStore {
    storage: Arc<dyn VaultStorage>,
}

impl MetaStore {
    pub fn new(storage: Arc<dyn VaultStorage>) -> Self {
        Self { storage }
    }

    /// Load the record, or `None` for a vault that was never initialized
    pub async fn load(&self) -> Result<Option<MasterMeta>> {
        match self.storage.load_meta().await? {
            Some(row) => MasterMeta::from_row(&row).map(Some),
            None => Ok(None),
        }
    }

    /// Create the record; fails with `AlreadyInitialized` if one exists
    pub async fn initialize(&self, salt: Salt, verifier: Verifier) -> Result<MasterMeta> {
        let meta = MasterMeta { salt, verifier };
        self.storage.insert_meta(meta.to_row()).await?;

        info!("Master metadata initialized");
        Ok(meta)
    }

    /// Replace the verifier, keeping the salt
    pub async fn update_verifier(&self, verifier: &Verifier) -> Result<()> {
        self.storage
            .update_verifier(encode_verifier(verifier))
            .await?;

        debug!("Master verifier updated");
        Ok(())
    }

    /// Whether a record exists
    pub async fn is_initialized(&self) -> Result<bool> {
        Ok(self.storage.load_meta().await?.is_some())
    }
}
