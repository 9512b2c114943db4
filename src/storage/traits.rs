//! Storage Trait Definitions
//!
//! `VaultStore` is the durable, consistency-guaranteeing side of the ledger. Every
//! mutation is atomic, re-checks its own preconditions and appends exactly one event.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::error::{LedgerError, VerificationError};
use crate::vault::{Coin, Vault, VaultEvent, VaultId};
use crate::verify::GroupSignature;

/// Storage errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("vault not found: {0}")]
    NotFound(VaultId),

    #[error("duplicate vault: {0}")]
    Duplicate(String),

    #[error("sequence conflict: expected {expected}, got {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },

    #[error("asset mismatch: vault holds {expected}, got {actual}")]
    AssetMismatch { expected: String, actual: String },

    #[error("authorization rejected: {0}")]
    Rejected(String),

    #[error("balance overflow")]
    Overflow,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for LedgerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => LedgerError::VaultNotFound(*id.as_uuid()),
            StorageError::Duplicate(_) => LedgerError::DuplicateVault,
            StorageError::Conflict { expected, actual } => {
                LedgerError::StaleSequence { expected, actual }
            }
            StorageError::InsufficientBalance {
                requested,
                available,
            } => LedgerError::InsufficientBalance {
                requested,
                available,
            },
            StorageError::AssetMismatch { expected, actual } => {
                LedgerError::AssetTypeMismatch { expected, actual }
            }
            StorageError::Rejected(_) => {
                LedgerError::Verification(VerificationError::InvalidSignature)
            }
            StorageError::Overflow => LedgerError::Overflow,
        }
    }
}

/// A debit authorized by a group signature over
/// `WithdrawalMessage { vault_id, amount, sequence }`
#[derive(Debug, Clone)]
pub struct Withdrawal {
    pub vault_id: VaultId,
    pub amount: u64,
    /// Sequence the signature was produced for; must equal the vault's current one
    pub sequence: u64,
    pub signature: GroupSignature,
}

/// Vault storage interface
///
/// Implementations:
/// - `MemoryVaultStore` - In-memory storage for tests and single-process use
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Insert a new vault, rejecting a second vault for the same asset type and key.
    /// Appends `VaultCreated`.
    async fn insert(&self, vault: Vault) -> StorageResult<()>;

    /// Get a vault by ID
    async fn get(&self, id: &VaultId) -> StorageResult<Option<Vault>>;

    /// Add a coin to a vault of the same asset type. Appends `Deposited`.
    async fn credit(&self, id: &VaultId, coin: &Coin) -> StorageResult<Vault>;

    /// Apply a withdrawal as one compare-and-swap on the vault's sequence.
    ///
    /// The store re-verifies the signature against the vault's bound key before
    /// touching the balance. Appends `Withdrawn`.
    async fn debit(&self, withdrawal: &Withdrawal) -> StorageResult<Vault>;

    /// All events in append order
    async fn events(&self) -> StorageResult<Vec<VaultEvent>>;

    /// Receive events appended from now on
    fn subscribe(&self) -> broadcast::Receiver<VaultEvent>;
}
