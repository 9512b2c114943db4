//! Custody vaults
//!
//! Each vault binds one asset type to one group key. Deposits are open; withdrawals
//! are gated on a group signature over `WithdrawalMessage`.

pub mod ledger;
pub mod message;
pub mod types;

pub use ledger::{AdminCap, VaultLedger};
pub use message::{WithdrawalMessage, WITHDRAW_DOMAIN, WITHDRAW_MESSAGE_VERSION};
pub use types::{AssetType, Coin, Vault, VaultEvent, VaultId, VaultSnapshot};
