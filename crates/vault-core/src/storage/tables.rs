//! Logical `meta` and `credentials` tables shared by every storage backend
//!
//! Backends never mutate a live [`VaultTables`] in place: they clone it,
//! apply the change to the clone, persist, and only then swap the clone in.
//! A failed step therefore leaves the visible state untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, VaultError};

/// The single `meta` row: base64 salt and verifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRow {
    pub salt: String,
    pub verifier: String,
}

/// One row of the `credentials` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRow {
    pub id: i64,
    pub service: String,
    pub username: String,
    pub link: String,
    /// Base64 envelope under the current vault key
    pub secret: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// A credential row before the table has assigned it an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredentialRow {
    pub service: String,
    pub username: String,
    pub link: String,
    pub secret: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// Everything a key rotation writes, applied as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationBatch {
    /// Verifier the rotation was computed against; the commit is refused if
    /// the stored verifier no longer matches
    pub expected_verifier: String,
    /// Verifier of the new key
    pub new_verifier: String,
    /// Re-encrypted secret for every stored credential, keyed by id
    pub secrets: BTreeMap<i64, String>,
}

/// In-memory image of the whole vault
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultTables {
    pub meta: Option<MetaRow>,
    pub credentials: BTreeMap<i64, CredentialRow>,
    /// Next id to hand out; ids are never reused
    pub next_id: i64,
}

impl VaultTables {
    /// Build tables from persisted parts, repairing `next_id` if it lags
    pub fn from_parts(
        meta: Option<MetaRow>,
        credentials: impl IntoIterator<Item = CredentialRow>,
        next_id: i64,
    ) -> Self {
        let credentials: BTreeMap<i64, CredentialRow> =
            credentials.into_iter().map(|row| (row.id, row)).collect();
        let floor = credentials.keys().next_back().map_or(1, |last| last + 1);

        Self {
            meta,
            credentials,
            next_id: next_id.max(floor),
        }
    }

    pub fn insert_meta(&mut self, meta: MetaRow) -> Result<()> {
        if self.meta.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }
        self.meta = Some(meta);
        Ok(())
    }

    pub fn update_verifier(&mut self, verifier: String) -> Result<()> {
        let meta = self.meta.as_mut().ok_or(VaultError::NotInitialized)?;
        meta.verifier = verifier;
        Ok(())
    }

    pub fn insert_credential(&mut self, row: NewCredentialRow) -> CredentialRow {
        let id = self.next_id.max(1);
        self.next_id = id + 1;

        let row = CredentialRow {
            id,
            service: row.service,
            username: row.username,
            link: row.link,
            secret: row.secret,
            category: row.category,
            created_at: row.created_at,
        };
        self.credentials.insert(id, row.clone());
        row
    }

    pub fn update_credential(&mut self, row: CredentialRow) -> Result<()> {
        match self.credentials.get_mut(&row.id) {
            Some(existing) => {
                *existing = row;
                Ok(())
            }
            None => Err(VaultError::NotFound(row.id)),
        }
    }

    pub fn delete_credential(&mut self, id: i64) -> Result<()> {
        self.credentials
            .remove(&id)
            .map(|_| ())
            .ok_or(VaultError::NotFound(id))
    }

    /// Apply a rotation: every secret and the verifier change together or not at all
    pub fn apply_rotation(&mut self, batch: RotationBatch) -> Result<()> {
        let meta = self.meta.as_mut().ok_or(VaultError::NotInitialized)?;
        if meta.verifier != batch.expected_verifier {
            return Err(VaultError::Storage(
                "verifier changed while rotation was in progress".to_string(),
            ));
        }

        let stored: BTreeSet<i64> = self.credentials.keys().copied().collect();
        let rotated: BTreeSet<i64> = batch.secrets.keys().copied().collect();
        if stored != rotated {
            return Err(VaultError::Storage(
                "rotation batch does not cover the credential table".to_string(),
            ));
        }

        meta.verifier = batch.new_verifier;
        for (id, secret) in batch.secrets {
            if let Some(row) = self.credentials.get_mut(&id) {
                row.secret = secret;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> MetaRow {
        MetaRow {
            salt: "c2FsdA==".to_string(),
            verifier: "old".to_string(),
        }
    }

    fn new_row(service: &str) -> NewCredentialRow {
        NewCredentialRow {
            service: service.to_string(),
            username: "user".to_string(),
            link: String::new(),
            secret: "ciphertext".to_string(),
            category: "work".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_meta_is_created_once() {
        let mut tables = VaultTables::default();

        tables.insert_meta(meta()).unwrap();
        assert!(matches!(
            tables.insert_meta(meta()),
            Err(VaultError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_update_verifier_requires_meta() {
        let mut tables = VaultTables::default();
        assert!(matches!(
            tables.update_verifier("v".to_string()),
            Err(VaultError::NotInitialized)
        ));
    }

    #[test]
    fn test_ids_are_stable_and_never_reused() {
        let mut tables = VaultTables::default();

        let a = tables.insert_credential(new_row("a"));
        let b = tables.insert_credential(new_row("b"));
        let c = tables.insert_credential(new_row("c"));
        assert_eq!((a.id, b.id, c.id), (1, 2, 3));

        tables.delete_credential(b.id).unwrap();
        assert_eq!(tables.credentials[&3].service, "c");

        let d = tables.insert_credential(new_row("d"));
        assert_eq!(d.id, 4);
    }

    #[test]
    fn test_from_parts_repairs_next_id() {
        let mut seed = VaultTables::default();
        let row = seed.insert_credential(new_row("a"));
        let row = CredentialRow { id: 9, ..row };

        let mut tables = VaultTables::from_parts(None, vec![row], 0);
        assert_eq!(tables.insert_credential(new_row("b")).id, 10);
    }

    #[test]
    fn test_missing_rows_report_not_found() {
        let mut tables = VaultTables::default();
        let row = tables.insert_credential(new_row("a"));

        assert!(matches!(tables.delete_credential(42), Err(VaultError::NotFound(42))));
        assert!(matches!(
            tables.update_credential(CredentialRow { id: 42, ..row }),
            Err(VaultError::NotFound(42))
        ));
    }

    #[test]
    fn test_apply_rotation_rewrites_everything() {
        let mut tables = VaultTables::default();
        tables.insert_meta(meta()).unwrap();
        let a = tables.insert_credential(new_row("a"));
        let b = tables.insert_credential(new_row("b"));

        let batch = RotationBatch {
            expected_verifier: "old".to_string(),
            new_verifier: "new".to_string(),
            secrets: [(a.id, "a2".to_string()), (b.id, "b2".to_string())].into(),
        };
        tables.apply_rotation(batch).unwrap();

        assert_eq!(tables.meta.as_ref().unwrap().verifier, "new");
        assert_eq!(tables.credentials[&a.id].secret, "a2");
        assert_eq!(tables.credentials[&b.id].secret, "b2");
    }

    #[test]
    fn test_apply_rotation_rejects_incomplete_batch() {
        let mut tables = VaultTables::default();
        tables.insert_meta(meta()).unwrap();
        let a = tables.insert_credential(new_row("a"));
        tables.insert_credential(new_row("b"));
        let before = tables.clone();

        let batch = RotationBatch {
            expected_verifier: "old".to_string(),
            new_verifier: "new".to_string(),
            secrets: [(a.id, "a2".to_string())].into(),
        };

        assert!(matches!(tables.apply_rotation(batch), Err(VaultError::Storage(_))));
        assert_eq!(tables, before);
    }

    #[test]
    fn test_apply_rotation_rejects_stale_verifier() {
        let mut tables = VaultTables::default();
        tables.insert_meta(meta()).unwrap();

        let batch = RotationBatch {
            expected_verifier: "stale".to_string(),
            new_verifier: "new".to_string(),
            secrets: BTreeMap::new(),
        };

        assert!(tables.apply_rotation(batch).is_err());
        assert_eq!(tables.meta.unwrap().verifier, "old");
    }
}
