//! Vault storage
//!
//! The ledger collaborator: durable vault state, atomic mutations and the event log.

pub mod memory;
pub mod traits;

pub use memory::MemoryVaultStore;
pub use traits::{StorageError, StorageResult, VaultStore, Withdrawal};
