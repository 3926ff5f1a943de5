//! Credential records: plaintext inputs, display summaries and the store

mod store;
mod types;

pub use store::CredentialStore;
pub use types::*;
