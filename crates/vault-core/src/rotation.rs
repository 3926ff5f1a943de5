//! Master key rotation
//!
//! Re-encrypts every credential under a key derived from the new password and
//! the vault's existing salt. The re-encrypted secrets and the new verifier are
//! committed as one storage write; any failure before or during that write
//! leaves the vault exactly as it was.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::crypto::{
    decrypt_string, derive_key_blocking, encrypt_string, verifier, verify_key, KeyDerivationParams,
};
use crate::error::{Result, RotationError, VaultError};
use crate::meta::{encode_verifier, MetaStore};
use crate::session::Session;
use crate::storage::{RotationBatch, VaultStorage, WriteGate};

/// Runs master password changes
#[derive(Clone)]
pub struct KeyRotationCoordinator {
    meta: MetaStore,
    storage: Arc<dyn VaultStorage>,
    write_gate: WriteGate,
    params: KeyDerivationParams,
}

impl KeyRotationCoordinator {
    pub(crate) fn new(
        storage: Arc<dyn VaultStorage>,
        write_gate: WriteGate,
        params: KeyDerivationParams,
    ) -> Self {
        Self {
            meta: MetaStore::new(storage.clone()),
            storage,
            write_gate,
            params,
        }
    }

    /// Change the master password
    ///
    /// Holds the exclusive write gate until the commit is done. On success the
    /// session's resident key is replaced with the new one, if the session is
    /// still unlocked.
    pub async fn rotate(
        &self,
        session: &Session,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let _gate = self.write_gate.write().await;
        session.touch()?;

        let meta = self.meta.load().await?.ok_or(VaultError::NotInitialized)?;

        let old_key = derive_key_blocking(old_password, meta.salt, self.params).await?;
        if !verify_key(&old_key, &meta.verifier) {
            warn!("Key rotation refused: old master password is incorrect");
            return Err(RotationError::WrongOldPassword.into());
        }

        info!("Key rotation started");
        let new_key = derive_key_blocking(new_password, meta.salt, self.params).await?;

        let rows = self
            .storage
            .list_credentials()
            .await
            .map_err(|e| abort(format!("failed to read credentials: {}", e)))?;

        let mut secrets = BTreeMap::new();
        for row in &rows {
            let plaintext = decrypt_string(&row.secret, &old_key)
                .map_err(|_| abort(format!("credential {} failed to decrypt", row.id)))?;
            let sealed = encrypt_string(plaintext.expose(), &new_key)
                .map_err(|e| abort(format!("credential {}: {}", row.id, e)))?;
            secrets.insert(row.id, sealed);
        }
        debug!(count = secrets.len(), "Credentials re-encrypted");

        let batch = RotationBatch {
            expected_verifier: encode_verifier(&meta.verifier),
            new_verifier: encode_verifier(&verifier(&new_key)),
            secrets,
        };
        self.storage
            .commit_rotation(batch)
            .await
            .map_err(|e| abort(format!("commit failed: {}", e)))?;

        if !session.replace_key(new_key) {
            debug!("Session locked during rotation, new key not retained");
        }

        info!(count = rows.len(), "Key rotation committed");
        Ok(())
    }
}

fn abort(reason: String) -> VaultError {
    warn!("Key rotation aborted: {}", reason);
    RotationError::PartialFailure(reason).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{CredentialStore, NewCredential};
    use crate::crypto::{derive_key, generate_salt, DerivedKey, TEST_PARAMS};
    use crate::session::SessionConfig;
    use crate::storage::{MemoryStorage, VaultTables};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use tokio::sync::RwLock;

    struct Fixture {
        storage: Arc<MemoryStorage>,
        gate: WriteGate,
        store: CredentialStore,
        rotation: KeyRotationCoordinator,
        session: Arc<Session>,
    }

    async fn fixture(password: &str, secrets: &[&str]) -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let gate: WriteGate = Arc::new(RwLock::new(()));

        let salt = generate_salt();
        let key = derive_key(password, &salt, Some(TEST_PARAMS));
        MetaStore::new(storage.clone())
            .initialize(salt, verifier(&key))
            .await
            .unwrap();

        let session = Arc::new(Session::new(SessionConfig::default()));
        session.admit(key).unwrap();

        let store = CredentialStore::new(storage.clone(), gate.clone());
        for (i, secret) in secrets.iter().enumerate() {
            store
                .create(
                    &session,
                    NewCredential::new(&format!("service-{}", i), "user", *secret),
                )
                .await
                .unwrap();
        }

        let rotation = KeyRotationCoordinator::new(storage.clone(), gate.clone(), TEST_PARAMS);
        Fixture {
            storage,
            gate,
            store,
            rotation,
            session,
        }
    }

    fn key_for(password: &str, tables: &VaultTables) -> DerivedKey {
        let encoded = &tables.meta.as_ref().unwrap().salt;
        let salt: [u8; 16] = STANDARD.decode(encoded).unwrap().try_into().unwrap();
        derive_key(password, &salt, Some(TEST_PARAMS))
    }

    #[tokio::test]
    async fn test_rotation_reencrypts_every_record() {
        let f = fixture("old-pass", &["one", "two", "three"]).await;
        let before = f.storage.snapshot().await;

        f.rotation
            .rotate(&f.session, "old-pass", "new-pass")
            .await
            .unwrap();

        let after = f.storage.snapshot().await;
        let old_key = key_for("old-pass", &before);
        let new_key = key_for("new-pass", &after);

        // Salt is kept, verifier now matches the new key
        assert_eq!(before.meta.as_ref().unwrap().salt, after.meta.as_ref().unwrap().salt);
        assert_eq!(
            after.meta.as_ref().unwrap().verifier,
            encode_verifier(&verifier(&new_key))
        );

        for row in after.credentials.values() {
            assert!(decrypt_string(&row.secret, &new_key).is_ok());
            assert!(decrypt_string(&row.secret, &old_key).is_err());
        }

        // The session continues with the new key
        let secrets: Vec<String> = f
            .store
            .read_all_revealed(&f.session)
            .await
            .unwrap()
            .iter()
            .map(|c| c.secret.expose().to_string())
            .collect();
        assert_eq!(secrets, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_wrong_old_password_changes_nothing() {
        let f = fixture("old-pass", &["one"]).await;
        let before = f.storage.snapshot().await;

        let result = f.rotation.rotate(&f.session, "guess", "new-pass").await;

        assert!(matches!(
            result,
            Err(VaultError::Rotation(RotationError::WrongOldPassword))
        ));
        assert_eq!(f.storage.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_undecryptable_record_aborts_rotation() {
        let f = fixture("old-pass", &["one", "two", "three"]).await;

        // Corrupt the second record
        let mut row = f.storage.get_credential(2).await.unwrap().unwrap();
        row.secret = encrypt_string("foreign", &DerivedKey::new([1u8; 32])).unwrap();
        f.storage.update_credential(row).await.unwrap();
        let before = f.storage.snapshot().await;

        let result = f.rotation.rotate(&f.session, "old-pass", "new-pass").await;

        assert!(matches!(
            result,
            Err(VaultError::Rotation(RotationError::PartialFailure(_)))
        ));
        assert_eq!(f.storage.snapshot().await, before);

        // Still usable with the old key
        assert_eq!(
            f.store.read_secret(&f.session, 1).await.unwrap().expose(),
            "one"
        );
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back() {
        let f = fixture("old-pass", &["one", "two"]).await;
        let before = f.storage.snapshot().await;
        f.storage.inject_write_failure();

        let result = f.rotation.rotate(&f.session, "old-pass", "new-pass").await;

        assert!(matches!(
            result,
            Err(VaultError::Rotation(RotationError::PartialFailure(_)))
        ));
        assert_eq!(f.storage.snapshot().await, before);
        assert_eq!(
            f.store.read_secret(&f.session, 2).await.unwrap().expose(),
            "two"
        );
    }

    #[tokio::test]
    async fn test_rotation_requires_unlocked_session() {
        let f = fixture("old-pass", &["one"]).await;
        f.session.lock();

        let result = f.rotation.rotate(&f.session, "old-pass", "new-pass").await;

        assert!(matches!(result, Err(VaultError::Locked)));
    }

    #[tokio::test]
    async fn test_rotate_empty_vault() {
        let f = fixture("old-pass", &[]).await;

        f.rotation
            .rotate(&f.session, "old-pass", "new-pass")
            .await
            .unwrap();

        let after = f.storage.snapshot().await;
        let new_key = key_for("new-pass", &after);
        assert_eq!(
            after.meta.unwrap().verifier,
            encode_verifier(&verifier(&new_key))
        );
    }

    #[tokio::test]
    async fn test_create_during_rotation_waits_and_uses_new_key() {
        let f = fixture("old-pass", &["one"]).await;
        let held = f.gate.write().await;

        let rotating = {
            let (rotation, session) = (f.rotation.clone(), f.session.clone());
            tokio::spawn(async move { rotation.rotate(&session, "old-pass", "new-pass").await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let creating = {
            let (store, session) = (f.store.clone(), f.session.clone());
            tokio::spawn(async move {
                store
                    .create(&session, NewCredential::new("late", "user", "two"))
                    .await
            })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // Neither can run while the exclusive side is held
        assert!(!rotating.is_finished());
        assert!(!creating.is_finished());
        assert_eq!(f.storage.snapshot().await.credentials.len(), 1);

        drop(held);
        rotating.await.unwrap().unwrap();
        let created = creating.await.unwrap().unwrap();

        let after = f.storage.snapshot().await;
        let new_key = key_for("new-pass", &after);
        let row = &after.credentials[&created.id];
        assert_eq!(decrypt_string(&row.secret, &new_key).unwrap().expose(), "two");
        for row in after.credentials.values() {
            assert!(decrypt_string(&row.secret, &new_key).is_ok());
        }
    }
}
