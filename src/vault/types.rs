//! Vault data types

use crate::error::LedgerError;
use crate::keys::GroupKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Vault identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaultId(Uuid);

impl VaultId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for VaultId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for VaultId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VaultId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Fully qualified asset type, `address::module::name`
///
/// The address is kept as 64 lowercase hex digits without `0x`, so `0x2::sui::SUI`
/// and `0x000...02::sui::SUI` name the same asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetType {
    address: String,
    module: String,
    name: String,
}

impl AssetType {
    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        let invalid = || LedgerError::InvalidAssetType(s.to_string());

        let mut parts = s.trim().splitn(3, "::");
        let (address, module, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(m), Some(n)) => (a, m, n),
            _ => return Err(invalid()),
        };

        let digits = address
            .strip_prefix("0x")
            .or_else(|| address.strip_prefix("0X"))
            .unwrap_or(address);
        if digits.is_empty() || digits.len() > 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        if !is_identifier(module) || !is_identifier(name) {
            return Err(invalid());
        }

        Ok(Self {
            address: format!("{:0>64}", digits.to_lowercase()),
            module: module.to_string(),
            name: name.to_string(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.address, self.module, self.name)
    }
}

impl FromStr for AssetType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AssetType {
    type Error = LedgerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<AssetType> for String {
    fn from(asset: AssetType) -> Self {
        asset.to_string()
    }
}

/// An amount of one asset type, as deposited or released
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub asset_type: AssetType,
    pub amount: u64,
}

impl Coin {
    pub fn new(asset_type: AssetType, amount: u64) -> Self {
        Self { asset_type, amount }
    }
}

/// A custody pool bound to one group key
#[derive(Debug, Clone)]
pub struct Vault {
    pub id: VaultId,
    pub asset_type: AssetType,
    pub balance: u64,
    pub group_key: GroupKey,
    /// Hex encoding of `group_key`
    pub public_key: String,
    /// Number of withdrawals applied so far; the next one must sign over this value
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl Vault {
    pub fn snapshot(&self) -> VaultSnapshot {
        VaultSnapshot {
            id: self.id,
            asset_type: self.asset_type.clone(),
            balance: self.balance,
            public_key: self.public_key.clone(),
            sequence: self.sequence,
            created_at: self.created_at,
        }
    }
}

/// Read-only view of a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub id: VaultId,
    pub asset_type: AssetType,
    pub balance: u64,
    pub public_key: String,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// Append-only ledger events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultEvent {
    VaultCreated {
        vault_id: VaultId,
        asset_type: AssetType,
        public_key: String,
    },
    Deposited {
        vault_id: VaultId,
        amount: u64,
    },
    Withdrawn {
        vault_id: VaultId,
        amount: u64,
        sequence: u64,
    },
}

impl VaultEvent {
    pub fn vault_id(&self) -> VaultId {
        match self {
            VaultEvent::VaultCreated { vault_id, .. }
            | VaultEvent::Deposited { vault_id, .. }
            | VaultEvent::Withdrawn { vault_id, .. } => *vault_id,
        }
    }
}
