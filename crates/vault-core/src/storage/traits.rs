//! Storage trait definitions

use async_trait::async_trait;

use super::tables::{CredentialRow, MetaRow, NewCredentialRow, RotationBatch};
use crate::error::Result;

/// Persistence capability for the `meta` and `credentials` tables.
///
/// Every mutating call is atomic: it either takes full effect or leaves the
/// tables exactly as they were, and concurrent readers never observe a
/// half-applied change.
#[async_trait]
pub trait VaultStorage: Send + Sync {
    /// Read the `meta` row, if the vault has been initialized
    async fn load_meta(&self) -> Result<Option<MetaRow>>;

    /// Create the `meta` row; fails with `AlreadyInitialized` if it exists
    async fn insert_meta(&self, meta: MetaRow) -> Result<()>;

    /// Replace the stored verifier
    async fn update_verifier(&self, verifier: String) -> Result<()>;

    /// Insert a credential and return it with its assigned id
    async fn insert_credential(&self, row: NewCredentialRow) -> Result<CredentialRow>;

    /// Fetch a credential by id
    async fn get_credential(&self, id: i64) -> Result<Option<CredentialRow>>;

    /// All credentials ordered by id
    async fn list_credentials(&self) -> Result<Vec<CredentialRow>>;

    /// Overwrite an existing credential; fails with `NotFound` if absent
    async fn update_credential(&self, row: CredentialRow) -> Result<()>;

    /// Remove a credential; fails with `NotFound` if absent
    async fn delete_credential(&self, id: i64) -> Result<()>;

    /// Write every re-encrypted secret and the new verifier as one transaction
    async fn commit_rotation(&self, batch: RotationBatch) -> Result<()>;

    /// Get a human-readable name for this storage backend
    fn backend_name(&self) -> &'static str;
}
