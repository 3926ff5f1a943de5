//! In-memory storage backend
//!
//! Used by tests and throwaway vaults. Supports injecting a write failure so
//! callers can check that a failed commit leaves nothing behind.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::tables::{CredentialRow, MetaRow, NewCredentialRow, RotationBatch, VaultTables};
use super::VaultStorage;
use crate::error::{Result, VaultError};

/// Volatile vault storage
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<VaultTables>,
    fail_next_write: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next mutating call fail with a storage error after its change
    /// has been staged, as a disk error during commit would
    pub fn inject_write_failure(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Copy of the current tables
    pub async fn snapshot(&self) -> VaultTables {
        self.tables.read().await.clone()
    }

    async fn mutate<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut VaultTables) -> Result<T> + Send,
        T: Send,
    {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        let output = change(&mut staged)?;

        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            debug!("Injected write failure, discarding staged change");
            return Err(VaultError::Storage("injected write failure".to_string()));
        }

        *tables = staged;
        Ok(output)
    }
}

#[async_trait]
impl VaultStorage for MemoryStorage {
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
        "In-Memory Storage"
    }
}
