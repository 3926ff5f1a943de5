//! Storage backends for vault persistence
//!
//! This module provides two backends behind the [`VaultStorage`] trait:
//! 1. JSON file (production)
//! 2. In-memory (tests, throwaway vaults)

mod file;
mod memory;
mod tables;
mod traits;

use std::sync::Arc;
use tokio::sync::RwLock;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use tables::{CredentialRow, MetaRow, NewCredentialRow, RotationBatch, VaultTables};
pub use traits::VaultStorage;

/// Gate shared by single-record writers (shared side) and key rotation
/// (exclusive side), so no record is written while a rotation is running.
pub(crate) type WriteGate = Arc<RwLock<()>>;
