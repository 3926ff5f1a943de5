//! JSON file storage backend
//!
//! Stores both tables in a single JSON document in the user's data
//! directory. Secrets inside it are already envelope-encrypted; the file
//! itself is plain JSON. Every write goes to a temp file which is synced and
//! then renamed over the previous document, so a crash leaves either the old
//! or the new vault on disk, never a mix.

use async_trait::async_trait;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use super::tables::{CredentialRow, MetaRow, NewCredentialRow, RotationBatch, VaultTables};
use super::VaultStorage;
use crate::error::{Result, VaultError};

/// Current on-disk format version
const FORMAT_VERSION: u32 = 1;

/// Name of the vault document inside the storage directory
const VAULT_FILE_NAME: &str = "vault.json";

/// File format for persistent storage
#[derive(Debug, Serialize, Deserialize)]
struct StorageFile {
    version: u32,
    meta: Option<MetaRow>,
    #[serde(default)]
    credentials: Vec<CredentialRow>,
    #[serde(default)]
    next_id: i64,
}

impl From<&VaultTables> for StorageFile {
    fn from(tables: &VaultTables) -> Self {
        Self {
            version: FORMAT_VERSION,
            meta: tables.meta.clone(),
            credentials: tables.credentials.values().cloned().collect(),
            next_id: tables.next_id,
        }
    }
}

/// File-backed vault storage
pub struct FileStorage {
    /// Directory holding the vault file
    storage_dir: PathBuf,
    /// Last committed state of the vault file
    tables: RwLock<VaultTables>,
}

impl FileStorage {
    /// Open the vault in the default per-user data directory
    pub async fn open_default() -> Result<Self> {
        Self::open(Self::default_dir()?).await
    }

    /// Open (or create) the vault in the given directory
    pub async fn open(storage_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&storage_dir)
            .await
            .map_err(|e| storage_error("create storage directory", e))?;

        let tables = Self::read_tables(&storage_dir.join(VAULT_FILE_NAME)).await?;
        debug!(
            credentials = tables.credentials.len(),
            initialized = tables.meta.is_some(),
            "File storage opened at {:?}",
            storage_dir
        );

        Ok(Self {
            storage_dir,
            tables: RwLock::new(tables),
        })
    }

    /// Get the default storage directory
    pub fn default_dir() -> Result<PathBuf> {
        ProjectDirs::from("org", "credential-vault", "credential-vault")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| VaultError::Storage("Could not determine data directory".to_string()))
    }

    /// Get the storage directory path
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Get the path to the vault file
    fn vault_file_path(&self) -> PathBuf {
        self.storage_dir.join(VAULT_FILE_NAME)
    }

    async fn read_tables(path: &Path) -> Result<VaultTables> {
        if !path.exists() {
            debug!("No existing vault file found");
            return Ok(VaultTables::default());
        }

        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| storage_error("read vault file", e))?;
        let file: StorageFile = serde_json::from_str(&contents)
            .map_err(|e| VaultError::Storage(format!("corrupt vault file: {}", e)))?;

        if file.version > FORMAT_VERSION {
            return Err(VaultError::Storage(format!(
                "unsupported vault file version {}",
                file.version
            )));
        }

        Ok(VaultTables::from_parts(file.meta, file.credentials, file.next_id))
    }

    /// Write the tables to disk atomically using a temp file
    async fn persist(&self, tables: &VaultTables) -> Result<()> {
        let contents = serde_json::to_string_pretty(&StorageFile::from(tables))?;
        let path = self.vault_file_path();
        let temp_path = path.with_extension("tmp");

        if let Err(e) = write_synced(&temp_path, contents.as_bytes()).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(storage_error("write vault file", e));
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(storage_error("replace vault file", e));
        }

        debug!(credentials = tables.credentials.len(), "Saved vault file");
        Ok(())
    }

    /// Apply `change` to a copy of the tables, persist it, then publish it
    async fn mutate<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut VaultTables) -> Result<T> + Send,
        T: Send,
    {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        let output = change(&mut staged)?;

        self.persist(&staged).await?;
        *tables = staged;
        Ok(output)
    }
}

async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }

    file.write_all(contents).await?;
    file.sync_all().await
}

fn storage_error(action: &str, e: std::io::Error) -> VaultError {
    VaultError::Storage(format!("failed to {}: {}", action, e))
}

#[async_trait]
impl VaultStorage for FileStorage {
    async fn load_meta(&self) -> Result<Option<MetaRow>> {
        Ok(self.tables.read().await.meta.clone())
    }

    async fn insert_meta(&self, meta: MetaRow) -> Result<()> {
        self.mutate(move |tables| tables.insert_meta(meta)).await
    }

    async fn update_verifier(&self, verifier: String) -> Result<()> {
        self.mutate(move |tables| tables.update_verifier(verifier)).await
    }

    async fn insert_credential(&self, row: NewCredentialRow) -> Result<CredentialRow> {
        self.mutate(move |tables| Ok(tables.insert_credential(row))).await
    }

    async fn get_credential(&self, id: i64) -> Result<Option<CredentialRow>> {
        Ok(self.tables.read().await.credentials.get(&id).cloned())
    }

    async fn list_credentials(&self) -> Result<Vec<CredentialRow>> {
        Ok(self.tables.read().await.credentials.values().cloned().collect())
    }

    async fn update_credential(&self, row: CredentialRow) -> Result<()> {
        self.mutate(move |tables| tables.update_credential(row)).await
    }

    async fn delete_credential(&self, id: i64) -> Result<()> {
        self.mutate(move |tables| tables.delete_credential(id)).await
    }

    async fn commit_rotation(&self, batch: RotationBatch) -> Result<()> {
        self.mutate(move |tables| tables.apply_rotation(batch)).await
    }

    fn backend_name(&self) -> &'static str {
        "JSON File Storage"
    }
}
