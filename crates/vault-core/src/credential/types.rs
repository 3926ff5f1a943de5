//! Credential type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::SecretString;
use crate::storage::CredentialRow;

/// Plaintext input for `create` and `update`
#[derive(Debug)]
pub struct NewCredential {
    /// Service name (e.g., "github")
    pub service: String,

    pub username: String,

    /// Login URL or any free-form pointer to the service
    pub link: String,

    /// Secret to encrypt; zeroized when dropped
    pub secret: SecretString,

    /// Exact-match grouping label
    pub category: String,
}

impl NewCredential {
    /// Create a credential with an empty link and category
    pub fn new(service: &str, username: &str, secret: impl Into<SecretString>) -> Self {
        Self {
            service: service.to_string(),
            username: username.to_string(),
            link: String::new(),
            secret: secret.into(),
            category: String::new(),
        }
    }

    pub fn with_link(mut self, link: &str) -> Self {
        self.link = link.to_string();
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }
}

/// Credential metadata (safe to display, never carries the secret)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSummary {
    /// Stable identifier, never reused
    pub id: i64,
    pub service: String,
    pub username: String,
    pub link: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

impl From<&CredentialRow> for CredentialSummary {
    fn from(row: &CredentialRow) -> Self {
        Self {
            id: row.id,
            service: row.service.clone(),
            username: row.username.clone(),
            link: row.link.clone(),
            category: row.category.clone(),
            created_at: row.created_at,
        }
    }
}

/// A credential together with its decrypted secret
#[derive(Debug)]
pub struct RevealedCredential {
    pub summary: CredentialSummary,
    pub secret: SecretString,
}

/// Search criteria; unset fields match everything, set fields are AND-combined
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialFilter {
    /// Case-insensitive substring of the service name
    pub service: Option<String>,
    /// Case-insensitive substring of the username
    pub username: Option<String>,
    /// Exact category
    pub category: Option<String>,
}

impl CredentialFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, needle: &str) -> Self {
        self.service = Some(needle.to_string());
        self
    }

    pub fn username(mut self, needle: &str) -> Self {
        self.username = Some(needle.to_string());
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    /// Whether the summary satisfies every set criterion
    pub fn matches(&self, credential: &CredentialSummary) -> bool {
        contains_ignore_case(&credential.service, self.service.as_deref())
            && contains_ignore_case(&credential.username, self.username.as_deref())
            && self
                .category
                .as_deref()
                .map_or(true, |category| category.is_empty() || credential.category == category)
    }
}

/// Empty or missing needles match everything
fn contains_ignore_case(haystack: &str, needle: Option<&str>) -> bool {
    match needle {
        None | Some("") => true,
        Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
    }
}
