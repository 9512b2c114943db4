//! Threshold-signature gated asset custody
//!
//! Funds sit in vaults bound to a FROST group key. A withdrawal is accepted only
//! with a group signature over the vault's canonical withdrawal message, which
//! any `t` of the `n` key holders can produce together.
//!
//! # Architecture
//!
//! - `keys`: dealer generation and splitting of an existing secret into `n` shares
//! - `signing` / `session` / `coordinator`: two-round FROST signing with
//!   single-use nonces and bounded waits
//! - `vault` / `storage`: the custody ledger and its store
//! - `api`: read-only HTTP queries over the ledger
//!
//! # Usage
//!
//! ```bash
//! assetman keygen --threshold 2 --total 3
//! assetman sign --signers 1,3 --message "hello"
//! assetman verify --message "hello" --signature <hex>
//! ```

pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod keys;
pub mod keystore;
pub mod logging;
pub mod session;
pub mod signing;
pub mod storage;
pub mod types;
pub mod vault;
pub mod verify;

pub use api::create_router;
pub use config::{AssetmanConfig, ConfigError, LogFormat};
pub use coordinator::{Coordinator, LocalEndpoint, SignerEndpoint};
pub use error::{AssetmanError, LedgerError, ProtocolError, Result, RetryHint, VerificationError};
pub use keys::{DealerOutput, GroupKey, Identifier, KeyPackage, PublicKeyPackage, SecretShare};
pub use keystore::{Keystore, KeystoreError};
pub use session::{SessionState, SigningSession};
pub use signing::{Commitment, NoncePair, SignatureShare, Signer, SigningPackage};
pub use storage::{MemoryVaultStore, StorageError, VaultStore};
pub use vault::{AdminCap, AssetType, Coin, VaultEvent, VaultId, VaultLedger, VaultSnapshot, WithdrawalMessage};
pub use verify::GroupSignature;
