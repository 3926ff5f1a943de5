//! Credential store for CRUD operations over encrypted records

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::types::{CredentialFilter, CredentialSummary, NewCredential, RevealedCredential};
use crate::clipboard::SecureClipboard;
use crate::crypto::{decrypt_string, encrypt_string, verify_key, DerivedKey, SecretString};
use crate::error::{Result, VaultError};
use crate::meta::MetaStore;
use crate::session::{KeyLease, LockReason, Session};
use crate::storage::{CredentialRow, NewCredentialRow, VaultStorage, WriteGate};

/// Credential store
///
/// Every call borrows the session's key for its own duration and holds the
/// shared side of the write gate, so it never interleaves with a rotation.
/// A session whose key no longer matches the stored verifier is locked
/// before anything is read or written with it.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn VaultStorage>,
    meta: MetaStore,
    write_gate: WriteGate,
}

impl CredentialStore {
    pub(crate) fn new(storage: Arc<dyn VaultStorage>, write_gate: WriteGate) -> Self {
        Self {
            meta: MetaStore::new(storage.clone()),
            storage,
            write_gate,
        }
    }

    /// Encrypt and store a new credential
    pub async fn create(
        &self,
        session: &Session,
        credential: NewCredential,
    ) -> Result<CredentialSummary> {
        let _gate = self.write_gate.read().await;
        let lease = self.authorize(session).await?;

        let secret = encrypt_string(credential.secret.expose(), lease.key())?;
        let row = self
            .storage
            .insert_credential(NewCredentialRow {
                service: credential.service.clone(),
                username: credential.username.clone(),
                link: credential.link.clone(),
                secret,
                category: credential.category.clone(),
                created_at: Utc::now(),
            })
            .await?;

        info!(id = row.id, "Added credential");
        Ok(CredentialSummary::from(&row))
    }

    /// All credentials without their secrets, in id order
    pub async fn read_all(&self, session: &Session) -> Result<Vec<CredentialSummary>> {
        let _gate = self.write_gate.read().await;
        self.authorize(session).await?;

        let rows = self.storage.list_credentials().await?;
        Ok(rows.iter().map(CredentialSummary::from).collect())
    }

    /// All credentials with their secrets decrypted
    ///
    /// Fails as a whole if any record does not decrypt.
    pub async fn read_all_revealed(&self, session: &Session) -> Result<Vec<RevealedCredential>> {
        let _gate = self.write_gate.read().await;
        let lease = self.authorize(session).await?;

        let rows = self.storage.list_credentials().await?;
        let revealed = rows
            .iter()
            .map(|row| reveal(row, lease.key()))
            .collect::<Result<Vec<_>>>()?;

        debug!(count = revealed.len(), "Revealed credentials");
        Ok(revealed)
    }

    /// One credential without its secret
    pub async fn read_by_id(&self, session: &Session, id: i64) -> Result<CredentialSummary> {
        let _gate = self.write_gate.read().await;
        self.authorize(session).await?;

        let row = self.require(id).await?;
        Ok(CredentialSummary::from(&row))
    }

    /// Decrypt one credential's secret on demand
    pub async fn read_secret(&self, session: &Session, id: i64) -> Result<SecretString> {
        let _gate = self.write_gate.read().await;
        let lease = self.authorize(session).await?;

        let row = self.require(id).await?;
        let secret = decrypt_string(&row.secret, lease.key())?;

        debug!(id, "Decrypted credential");
        Ok(secret)
    }

    /// Replace every field of a credential; `created_at` and the id are kept
    pub async fn update(
        &self,
        session: &Session,
        id: i64,
        credential: NewCredential,
    ) -> Result<CredentialSummary> {
        let _gate = self.write_gate.read().await;
        let lease = self.authorize(session).await?;

        let existing = self.require(id).await?;
        let row = CredentialRow {
            id,
            service: credential.service.clone(),
            username: credential.username.clone(),
            link: credential.link.clone(),
            secret: encrypt_string(credential.secret.expose(), lease.key())?,
            category: credential.category.clone(),
            created_at: existing.created_at,
        };
        self.storage.update_credential(row.clone()).await?;

        info!(id, "Updated credential");
        Ok(CredentialSummary::from(&row))
    }

    /// Delete a credential; other ids are unaffected
    pub async fn delete(&self, session: &Session, id: i64) -> Result<()> {
        let _gate = self.write_gate.read().await;
        self.authorize(session).await?;

        self.storage.delete_credential(id).await?;

        info!(id, "Deleted credential");
        Ok(())
    }

    /// Credentials matching every set criterion of the filter
    pub async fn filter(
        &self,
        session: &Session,
        filter: &CredentialFilter,
    ) -> Result<Vec<CredentialSummary>> {
        let all = self.read_all(session).await?;
        Ok(all.into_iter().filter(|c| filter.matches(c)).collect())
    }

    /// Copy a credential's secret to the clipboard and schedule the clear
    pub async fn copy_secret(
        &self,
        session: &Session,
        id: i64,
        clipboard: &SecureClipboard,
    ) -> Result<JoinHandle<()>> {
        let secret = self.read_secret(session, id).await?;
        clipboard.copy(&secret)
    }

    /// Lease the session's key; call with the write gate held
    async fn authorize(&self, session: &Session) -> Result<KeyLease> {
        let lease = session.lease()?;
        let meta = self.meta.load().await?.ok_or(VaultError::NotInitialized)?;

        if !verify_key(lease.key(), &meta.verifier) {
            session.revoke(&lease, LockReason::KeyChanged);
            warn!("Session key was superseded by a rotation, session locked");
            return Err(VaultError::Locked);
        }
        Ok(lease)
    }

    async fn require(&self, id: i64) -> Result<CredentialRow> {
        self.storage
            .get_credential(id)
            .await?
            .ok_or(VaultError::NotFound(id))
    }
}

fn reveal(row: &CredentialRow, key: &DerivedKey) -> Result<RevealedCredential> {
    Ok(RevealedCredential {
        summary: CredentialSummary::from(row),
        secret: decrypt_string(&row.secret, key)?,
    })
}
