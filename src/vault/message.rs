//! Canonical withdrawal authorization message
//!
//! Layout (version 1):
//!
//! ```text
//! "assetman/withdraw" || 0x01 || vault_id (16 bytes) || amount (u64 BE) || sequence (u64 BE)
//! ```
//!
//! The group signs the SHA-256 digest of these bytes. Changing the layout requires
//! a new version byte.

use super::types::VaultId;
use sha2::{Digest, Sha256};

pub const WITHDRAW_DOMAIN: &[u8] = b"assetman/withdraw";
pub const WITHDRAW_MESSAGE_VERSION: u8 = 1;

/// What a signing quorum authorizes: release `amount` from `vault_id` at `sequence`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalMessage {
    pub vault_id: VaultId,
    pub amount: u64,
    pub sequence: u64,
}

impl WithdrawalMessage {
    pub fn new(vault_id: VaultId, amount: u64, sequence: u64) -> Self {
        Self {
            vault_id,
            amount,
            sequence,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(WITHDRAW_DOMAIN.len() + 1 + 16 + 8 + 8);
        bytes.extend_from_slice(WITHDRAW_DOMAIN);
        bytes.push(WITHDRAW_MESSAGE_VERSION);
        bytes.extend_from_slice(self.vault_id.as_bytes());
        bytes.extend_from_slice(&self.amount.to_be_bytes());
        bytes.extend_from_slice(&self.sequence.to_be_bytes());
        bytes
    }

    /// The 32 bytes the group actually signs
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.encode()).into()
    }
}
