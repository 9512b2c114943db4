//! In-Memory Storage Implementation
//!
//! Data is lost when the process exits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use super::traits::{StorageError, StorageResult, VaultStore, Withdrawal};
use crate::vault::{Coin, Vault, VaultEvent, VaultId, WithdrawalMessage};
use crate::verify;

#[derive(Default)]
struct StoreState {
    vaults: HashMap<VaultId, Vault>,
    /// Index: (asset type, group key hex) -> vault ID
    by_binding: HashMap<(String, String), VaultId>,
    events: Vec<VaultEvent>,
}

/// In-memory vault store
///
/// One lock covers vaults, the binding index and the event log, so each
/// mutation and its event are applied together.
#[derive(Clone)]
pub struct MemoryVaultStore {
    state: Arc<RwLock<StoreState>>,
    event_tx: broadcast::Sender<VaultEvent>,
}

impl MemoryVaultStore {
    pub fn new(event_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity.max(1));
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            event_tx,
        }
    }

    /// Number of vaults stored
    pub async fn len(&self) -> usize {
        self.state.read().await.vaults.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn append(&self, state: &mut StoreState, event: VaultEvent) {
        state.events.push(event.clone());
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

impl Default for MemoryVaultStore {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl VaultStore for MemoryVaultStore {
    async fn insert(&self, vault: Vault) -> StorageResult<()> {
        let mut state = self.state.write().await;

        if state.vaults.contains_key(&vault.id) {
            return Err(StorageError::Duplicate(vault.id.to_string()));
        }
        let binding = (vault.asset_type.to_string(), vault.public_key.clone());
        if let Some(existing) = state.by_binding.get(&binding) {
            return Err(StorageError::Duplicate(format!(
                "{} already holds {} for this key",
                existing, binding.0
            )));
        }

        let event = VaultEvent::VaultCreated {
            vault_id: vault.id,
            asset_type: vault.asset_type.clone(),
            public_key: vault.public_key.clone(),
        };
        state.by_binding.insert(binding, vault.id);
        state.vaults.insert(vault.id, vault);
        self.append(&mut state, event);
        Ok(())
    }

    async fn get(&self, id: &VaultId) -> StorageResult<Option<Vault>> {
        let state = self.state.read().await;
        Ok(state.vaults.get(id).cloned())
    }

    async fn credit(&self, id: &VaultId, coin: &Coin) -> StorageResult<Vault> {
        let mut state = self.state.write().await;
        let vault = state.vaults.get_mut(id).ok_or(StorageError::NotFound(*id))?;

        if vault.asset_type != coin.asset_type {
            return Err(StorageError::AssetMismatch {
                expected: vault.asset_type.to_string(),
                actual: coin.asset_type.to_string(),
            });
        }
        vault.balance = vault
            .balance
            .checked_add(coin.amount)
            .ok_or(StorageError::Overflow)?;

        let updated = vault.clone();
        self.append(
            &mut state,
            VaultEvent::Deposited {
                vault_id: *id,
                amount: coin.amount,
            },
        );
        Ok(updated)
    }

    async fn debit(&self, withdrawal: &Withdrawal) -> StorageResult<Vault> {
        let mut state = self.state.write().await;
        let vault = state
            .vaults
            .get_mut(&withdrawal.vault_id)
            .ok_or(StorageError::NotFound(withdrawal.vault_id))?;

        if vault.sequence != withdrawal.sequence {
            return Err(StorageError::Conflict {
                expected: vault.sequence,
                actual: withdrawal.sequence,
            });
        }
        if withdrawal.amount > vault.balance {
            return Err(StorageError::InsufficientBalance {
                requested: withdrawal.amount,
                available: vault.balance,
            });
        }

        let message = WithdrawalMessage::new(withdrawal.vault_id, withdrawal.amount, withdrawal.sequence);
        if !verify::verify_with_key(&withdrawal.signature, &message.digest(), &vault.group_key) {
            return Err(StorageError::Rejected(format!(
                "signature does not verify for vault {} at sequence {}",
                withdrawal.vault_id, withdrawal.sequence
            )));
        }

        let next_sequence = vault.sequence.checked_add(1).ok_or(StorageError::Overflow)?;
        vault.balance -= withdrawal.amount;
        vault.sequence = next_sequence;

        let updated = vault.clone();
        self.append(
            &mut state,
            VaultEvent::Withdrawn {
                vault_id: withdrawal.vault_id,
                amount: withdrawal.amount,
                sequence: withdrawal.sequence,
            },
        );
        Ok(updated)
    }

    async fn events(&self) -> StorageResult<Vec<VaultEvent>> {
        Ok(self.state.read().await.events.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{self, GroupKey};
    use crate::vault::AssetType;

    fn sui() -> AssetType {
        AssetType::parse("0x2::sui::SUI").unwrap()
    }

    fn vault(group_key: GroupKey, balance: u64) -> Vault {
        Vault {
            id: VaultId::new(),
            asset_type: sui(),
            balance,
            group_key,
            public_key: group_key.to_hex().unwrap(),
            sequence: 0,
            created_at: chrono::Utc::now(),
        }
    }

    fn group_key() -> GroupKey {
        keys::generate(3, 2).unwrap().public_key_package.group_key()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryVaultStore::default();
        let v = vault(group_key(), 100);
        let id = v.id;
        store.insert(v).await.unwrap();

        let fetched = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.balance, 100);
        assert_eq!(store.len().await, 1);
        assert!(store.get(&VaultId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_binding_rejected() {
        let store = MemoryVaultStore::default();
        let key = group_key();
        store.insert(vault(key, 0)).await.unwrap();

        let result = store.insert(vault(key, 50)).await;
        assert!(matches!(result, Err(StorageError::Duplicate(_))));

        // same key for another asset is a different binding
        let mut other = vault(key, 0);
        other.asset_type = AssetType::parse("0x5::usdc::USDC").unwrap();
        store.insert(other).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_credit_checks_asset_and_emits_event() {
        let store = MemoryVaultStore::default();
        let mut events = store.subscribe();
        let v = vault(group_key(), 10);
        let id = v.id;
        store.insert(v).await.unwrap();

        let updated = store.credit(&id, &Coin::new(sui(), 5)).await.unwrap();
        assert_eq!(updated.balance, 15);

        let wrong = Coin::new(AssetType::parse("0x5::usdc::USDC").unwrap(), 5);
        assert!(matches!(
            store.credit(&id, &wrong).await,
            Err(StorageError::AssetMismatch { .. })
        ));

        assert!(matches!(events.recv().await.unwrap(), VaultEvent::VaultCreated { .. }));
        assert_eq!(
            events.recv().await.unwrap(),
            VaultEvent::Deposited {
                vault_id: id,
                amount: 5
            }
        );
        assert_eq!(store.events().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_credit_overflow_leaves_balance() {
        let store = MemoryVaultStore::default();
        let v = vault(group_key(), u64::MAX);
        let id = v.id;
        store.insert(v).await.unwrap();

        assert_eq!(
            store.credit(&id, &Coin::new(sui(), 1)).await.unwrap_err(),
            StorageError::Overflow
        );
        assert_eq!(store.get(&id).await.unwrap().unwrap().balance, u64::MAX);
    }
}
