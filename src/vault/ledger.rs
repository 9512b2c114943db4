//! Custody ledger service
//!
//! Vaults are created by the holder of the ledger's `AdminCap`. Anyone may deposit.
//! A withdrawal needs a group signature over the canonical withdrawal message for
//! the vault's current sequence; every check completes before the store is asked
//! to apply the debit.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::message::WithdrawalMessage;
use super::types::{AssetType, Coin, Vault, VaultEvent, VaultId, VaultSnapshot};
use crate::error::LedgerError;
use crate::keys::GroupKey;
use crate::logging::{log_security_event, log_vault_event};
use crate::storage::{MemoryVaultStore, VaultStore, Withdrawal};
use crate::verify::{self, GroupSignature};

/// Capability to create vaults on one ledger
///
/// Issued exactly once by `VaultLedger::new`; not `Clone`.
pub struct AdminCap {
    ledger_id: Uuid,
}

impl fmt::Debug for AdminCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AdminCap({})", self.ledger_id)
    }
}

pub struct VaultLedger {
    id: Uuid,
    store: Arc<dyn VaultStore>,
}

impl VaultLedger {
    /// Create a ledger over `store` together with its admin capability
    pub fn new(store: Arc<dyn VaultStore>) -> (Self, AdminCap) {
        let id = Uuid::new_v4();
        (Self { id, store }, AdminCap { ledger_id: id })
    }

    /// Ledger backed by a fresh `MemoryVaultStore`
    pub fn in_memory(event_capacity: usize) -> (Self, AdminCap) {
        Self::new(Arc::new(MemoryVaultStore::new(event_capacity)))
    }

    /// Bind `group_key` to a new vault holding `initial`
    pub async fn create_vault(
        &self,
        cap: &AdminCap,
        group_key: GroupKey,
        initial: Coin,
    ) -> Result<VaultId, LedgerError> {
        if cap.ledger_id != self.id {
            log_security_event(
                "create_vault_unauthorized",
                false,
                serde_json::json!({ "asset_type": initial.asset_type.to_string() }),
                None,
            );
            return Err(LedgerError::Unauthorized);
        }

        let public_key = group_key
            .to_hex()
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        let vault = Vault {
            id: VaultId::new(),
            asset_type: initial.asset_type,
            balance: initial.amount,
            group_key,
            public_key,
            sequence: 0,
            created_at: Utc::now(),
        };
        let vault_id = vault.id;
        let asset_type = vault.asset_type.to_string();

        self.store.insert(vault).await?;

        tracing::info!(
            vault_id = %vault_id,
            asset_type = %asset_type,
            balance = initial.amount,
            "Vault created"
        );
        log_vault_event("vault_created", &vault_id.to_string(), initial.amount, true, None);

        Ok(vault_id)
    }

    /// Add `coin` to a vault. Returns the new balance.
    pub async fn deposit(&self, vault_id: &VaultId, coin: Coin) -> Result<u64, LedgerError> {
        if coin.amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let vault = self.store.credit(vault_id, &coin).await?;

        tracing::debug!(
            vault_id = %vault_id,
            amount = coin.amount,
            balance = vault.balance,
            "Deposit applied"
        );
        log_vault_event("deposited", &vault_id.to_string(), coin.amount, true, None);

        Ok(vault.balance)
    }

    /// Release `amount` with a signature over the vault's current sequence.
    /// Returns the released coin and the new balance.
    pub async fn withdraw(
        &self,
        vault_id: &VaultId,
        amount: u64,
        signature: &GroupSignature,
    ) -> Result<(Coin, u64), LedgerError> {
        let vault = self.load(vault_id).await?;
        let sequence = vault.sequence;
        self.authorize_and_debit(vault, amount, sequence, signature).await
    }

    /// Release `amount` with a signature the caller produced for `sequence`.
    /// Fails with `StaleSequence` if the vault has moved on.
    pub async fn withdraw_at(
        &self,
        vault_id: &VaultId,
        amount: u64,
        sequence: u64,
        signature: &GroupSignature,
    ) -> Result<(Coin, u64), LedgerError> {
        let vault = self.load(vault_id).await?;
        self.authorize_and_debit(vault, amount, sequence, signature).await
    }

    async fn authorize_and_debit(
        &self,
        vault: Vault,
        amount: u64,
        sequence: u64,
        signature: &GroupSignature,
    ) -> Result<(Coin, u64), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        if sequence != vault.sequence {
            return Err(LedgerError::StaleSequence {
                expected: vault.sequence,
                actual: sequence,
            });
        }
        if amount > vault.balance {
            log_vault_event(
                "withdraw_rejected",
                &vault.id.to_string(),
                amount,
                false,
                Some(("INSUFFICIENT_BALANCE", "amount exceeds balance")),
            );
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: vault.balance,
            });
        }

        let message = WithdrawalMessage::new(vault.id, amount, sequence);
        if let Err(e) = verify::require_valid(signature, &message.digest(), &vault.group_key) {
            log_security_event(
                "withdraw_signature_rejected",
                false,
                serde_json::json!({
                    "vault_id": vault.id.to_string(),
                    "amount": amount,
                    "sequence": sequence,
                }),
                Some(&vault.id.to_string()),
            );
            return Err(e.into());
        }

        let updated = self
            .store
            .debit(&Withdrawal {
                vault_id: vault.id,
                amount,
                sequence,
                signature: *signature,
            })
            .await?;

        tracing::info!(
            vault_id = %vault.id,
            amount,
            sequence,
            balance = updated.balance,
            "Withdrawal applied"
        );
        log_vault_event("withdrawn", &vault.id.to_string(), amount, true, None);

        Ok((Coin::new(updated.asset_type, amount), updated.balance))
    }

    async fn load(&self, vault_id: &VaultId) -> Result<Vault, LedgerError> {
        self.store
            .get(vault_id)
            .await?
            .ok_or(LedgerError::VaultNotFound(*vault_id.as_uuid()))
    }

    pub async fn get_balance(&self, vault_id: &VaultId) -> Result<u64, LedgerError> {
        Ok(self.load(vault_id).await?.balance)
    }

    pub async fn get_vault(&self, vault_id: &VaultId) -> Result<VaultSnapshot, LedgerError> {
        Ok(self.load(vault_id).await?.snapshot())
    }

    /// The message a quorum must sign to withdraw `amount` at the vault's current sequence
    pub async fn withdrawal_message(
        &self,
        vault_id: &VaultId,
        amount: u64,
    ) -> Result<WithdrawalMessage, LedgerError> {
        let vault = self.load(vault_id).await?;
        Ok(WithdrawalMessage::new(vault.id, amount, vault.sequence))
    }

    /// Vaults in creation order, optionally restricted to one asset type
    pub async fn list_vaults(
        &self,
        asset_type: Option<&AssetType>,
    ) -> Result<Vec<VaultSnapshot>, LedgerError> {
        let mut snapshots = Vec::new();
        for event in self.store.events().await? {
            let VaultEvent::VaultCreated {
                vault_id,
                asset_type: created_type,
                ..
            } = event
            else {
                continue;
            };
            if asset_type.is_some_and(|wanted| *wanted != created_type) {
                continue;
            }
            if let Some(vault) = self.store.get(&vault_id).await? {
                snapshots.push(vault.snapshot());
            }
        }
        Ok(snapshots)
    }

    pub async fn events(&self) -> Result<Vec<VaultEvent>, LedgerError> {
        Ok(self.store.events().await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.store.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VerificationError;
    use crate::keys::{self, Identifier, KeyPackage, PublicKeyPackage};
    use crate::signing::{aggregate, build_signing_package, commit, sign};
    use crate::storage::StorageError;
    use std::collections::BTreeMap;

    struct Group {
        packages: BTreeMap<Identifier, KeyPackage>,
        pkp: PublicKeyPackage,
    }

    impl Group {
        fn new(n: u16, t: u16) -> Self {
            let (packages, pkp) = keys::generate(n, t).unwrap().into_key_packages().unwrap();
            Self { packages, pkp }
        }

        fn sign(&self, message: &WithdrawalMessage) -> GroupSignature {
            let digest = message.digest();
            let quorum: Vec<&KeyPackage> = self
                .packages
                .values()
                .take(self.pkp.min_signers() as usize)
                .collect();

            let mut nonces = Vec::new();
            let mut commitments = BTreeMap::new();
            for kp in &quorum {
                let (pair, commitment) = commit(kp);
                nonces.push(pair);
                commitments.insert(kp.identifier(), commitment);
            }
            let package = build_signing_package(&digest, commitments).unwrap();

            let mut shares = BTreeMap::new();
            for (kp, pair) in quorum.iter().zip(nonces) {
                shares.insert(kp.identifier(), sign(&package, pair, kp).unwrap());
            }
            aggregate(&package, &shares, &self.pkp).unwrap()
        }
    }

    fn sui() -> AssetType {
        AssetType::parse("0x2::sui::SUI").unwrap()
    }

    async fn funded_vault(balance: u64) -> (VaultLedger, Group, VaultId) {
        let (ledger, cap) = VaultLedger::in_memory(64);
        let group = Group::new(3, 2);
        let vault_id = ledger
            .create_vault(&cap, group.pkp.group_key(), Coin::new(sui(), balance))
            .await
            .unwrap();
        (ledger, group, vault_id)
    }

    #[tokio::test]
    async fn test_create_vault_requires_own_cap() {
        let (ledger, _cap) = VaultLedger::in_memory(16);
        let (_, foreign_cap) = VaultLedger::in_memory(16);
        let group = Group::new(3, 2);

        let result = ledger
            .create_vault(&foreign_cap, group.pkp.group_key(), Coin::new(sui(), 0))
            .await;
        assert_eq!(result.unwrap_err(), LedgerError::Unauthorized);
        assert!(ledger.list_vaults(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_vault_rejected() {
        let (ledger, cap) = VaultLedger::in_memory(16);
        let group = Group::new(3, 2);
        ledger
            .create_vault(&cap, group.pkp.group_key(), Coin::new(sui(), 0))
            .await
            .unwrap();
        let again = ledger
            .create_vault(&cap, group.pkp.group_key(), Coin::new(sui(), 10))
            .await;
        assert_eq!(again.unwrap_err(), LedgerError::DuplicateVault);
    }

    #[tokio::test]
    async fn test_deposit_rules() {
        let (ledger, _, vault_id) = funded_vault(100).await;

        assert_eq!(ledger.deposit(&vault_id, Coin::new(sui(), 50)).await.unwrap(), 150);
        assert_eq!(
            ledger.deposit(&vault_id, Coin::new(sui(), 0)).await.unwrap_err(),
            LedgerError::ZeroAmount
        );

        let usdc = AssetType::parse("0x5::usdc::USDC").unwrap();
        assert!(matches!(
            ledger.deposit(&vault_id, Coin::new(usdc, 10)).await,
            Err(LedgerError::AssetTypeMismatch { .. })
        ));

        let missing = VaultId::new();
        assert_eq!(
            ledger.deposit(&missing, Coin::new(sui(), 1)).await.unwrap_err(),
            LedgerError::VaultNotFound(*missing.as_uuid())
        );
        assert_eq!(ledger.get_balance(&vault_id).await.unwrap(), 150);
    }

    #[tokio::test]
    async fn test_withdraw_advances_sequence_and_rejects_replay() {
        let (ledger, group, vault_id) = funded_vault(1000).await;

        let message = ledger.withdrawal_message(&vault_id, 150).await.unwrap();
        assert_eq!(message.sequence, 0);
        let signature = group.sign(&message);

        let (coin, balance) = ledger.withdraw(&vault_id, 150, &signature).await.unwrap();
        assert_eq!(coin, Coin::new(sui(), 150));
        assert_eq!(balance, 850);
        assert_eq!(ledger.get_vault(&vault_id).await.unwrap().sequence, 1);

        assert_eq!(
            ledger.withdraw(&vault_id, 150, &signature).await.unwrap_err(),
            LedgerError::Verification(VerificationError::InvalidSignature)
        );
        assert_eq!(
            ledger.withdraw_at(&vault_id, 150, 0, &signature).await.unwrap_err(),
            LedgerError::StaleSequence {
                expected: 1,
                actual: 0
            }
        );
        assert_eq!(ledger.get_balance(&vault_id).await.unwrap(), 850);
    }

    #[tokio::test]
    async fn test_invalid_signature_leaves_vault_untouched() {
        let (ledger, group, vault_id) = funded_vault(1000).await;

        // signed for a different amount
        let signature = group.sign(&WithdrawalMessage::new(vault_id, 100, 0));
        assert_eq!(
            ledger.withdraw(&vault_id, 150, &signature).await.unwrap_err(),
            LedgerError::Verification(VerificationError::InvalidSignature)
        );

        // signed by another group
        let stranger = Group::new(3, 2).sign(&WithdrawalMessage::new(vault_id, 150, 0));
        assert!(ledger.withdraw(&vault_id, 150, &stranger).await.is_err());

        let snapshot = ledger.get_vault(&vault_id).await.unwrap();
        assert_eq!(snapshot.balance, 1000);
        assert_eq!(snapshot.sequence, 0);
    }

    #[tokio::test]
    async fn test_insufficient_balance_leaves_vault_untouched() {
        let (ledger, group, vault_id) = funded_vault(1000).await;
        let signature = group.sign(&WithdrawalMessage::new(vault_id, 1001, 0));

        assert_eq!(
            ledger.withdraw(&vault_id, 1001, &signature).await.unwrap_err(),
            LedgerError::InsufficientBalance {
                requested: 1001,
                available: 1000
            }
        );
        assert_eq!(ledger.get_balance(&vault_id).await.unwrap(), 1000);
        assert_eq!(ledger.withdraw(&vault_id, 0, &signature).await.unwrap_err(), LedgerError::ZeroAmount);
    }

    #[tokio::test]
    async fn test_concurrent_withdrawals_for_same_sequence() {
        let (ledger, group, vault_id) = funded_vault(1000).await;
        let first = group.sign(&WithdrawalMessage::new(vault_id, 100, 0));
        let second = group.sign(&WithdrawalMessage::new(vault_id, 200, 0));

        let (a, b) = tokio::join!(
            ledger.withdraw_at(&vault_id, 100, 0, &first),
            ledger.withdraw_at(&vault_id, 200, 0, &second),
        );
        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);

        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(LedgerError::StaleSequence { .. })));
        assert_eq!(ledger.get_vault(&vault_id).await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_store_rechecks_sequence_and_signature() {
        let store = Arc::new(MemoryVaultStore::new(16));
        let (ledger, cap) = VaultLedger::new(store.clone());
        let group = Group::new(3, 2);
        let vault_id = ledger
            .create_vault(&cap, group.pkp.group_key(), Coin::new(sui(), 500))
            .await
            .unwrap();

        let signature = group.sign(&WithdrawalMessage::new(vault_id, 100, 0));
        let forged = Withdrawal {
            vault_id,
            amount: 400,
            sequence: 0,
            signature,
        };
        assert!(matches!(store.debit(&forged).await, Err(StorageError::Rejected(_))));

        let genuine = Withdrawal {
            amount: 100,
            ..forged
        };
        store.debit(&genuine).await.unwrap();
        assert_eq!(
            store.debit(&genuine).await.unwrap_err(),
            StorageError::Conflict {
                expected: 1,
                actual: 0
            }
        );
        assert_eq!(ledger.get_balance(&vault_id).await.unwrap(), 400);
    }

    #[tokio::test]
    async fn test_list_vaults_filters_by_asset_type() {
        let (ledger, cap) = VaultLedger::in_memory(16);
        let usdc = AssetType::parse("0x5::usdc::USDC").unwrap();
        let sui_vault = ledger
            .create_vault(&cap, Group::new(3, 2).pkp.group_key(), Coin::new(sui(), 1))
            .await
            .unwrap();
        let usdc_vault = ledger
            .create_vault(&cap, Group::new(3, 2).pkp.group_key(), Coin::new(usdc.clone(), 2))
            .await
            .unwrap();

        let all = ledger.list_vaults(None).await.unwrap();
        assert_eq!(all.iter().map(|v| v.id).collect::<Vec<_>>(), vec![sui_vault, usdc_vault]);

        let filter = AssetType::parse("0x0005::usdc::USDC").unwrap();
        let only_usdc = ledger.list_vaults(Some(&filter)).await.unwrap();
        assert_eq!(only_usdc.len(), 1);
        assert_eq!(only_usdc[0].id, usdc_vault);
        assert_eq!(only_usdc[0].asset_type, usdc);
    }

    #[tokio::test]
    async fn test_subscribers_see_events_in_order() {
        let (ledger, group, vault_id) = funded_vault(10).await;
        let mut events = ledger.subscribe();

        ledger.deposit(&vault_id, Coin::new(sui(), 5)).await.unwrap();
        let signature = group.sign(&WithdrawalMessage::new(vault_id, 15, 0));
        ledger.withdraw(&vault_id, 15, &signature).await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            VaultEvent::Deposited { vault_id, amount: 5 }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            VaultEvent::Withdrawn {
                vault_id,
                amount: 15,
                sequence: 0
            }
        );
        assert_eq!(ledger.events().await.unwrap().len(), 3);
    }
}
