//! Threshold key material
//!
//! A trusted dealer either samples a fresh group secret (`generate`) or takes an
//! existing one (`split`) and deals `n` Shamir shares of it, any `t` of which can sign.
//! Secret material is wrapped in non-cloneable types so that a share has exactly one owner.

use crate::error::ProtocolError;
use frost_secp256k1_tr as frost;
use rand::rngs::OsRng;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroU16;

/// Participant identifier, derived from a 1-based index
#[derive(Clone, Copy)]
pub struct Identifier {
    index: NonZeroU16,
    inner: frost::Identifier,
}

impl Identifier {
    /// Build the identifier for participant `index` (1-based)
    pub fn from_index(index: u16) -> Result<Self, ProtocolError> {
        let nonzero = NonZeroU16::new(index)
            .ok_or_else(|| ProtocolError::InvalidEncoding("participant index must be non-zero".into()))?;
        let inner = frost::Identifier::try_from(index)
            .map_err(|e| ProtocolError::Frost(e.to_string()))?;
        Ok(Self {
            index: nonzero,
            inner,
        })
    }

    pub fn index(&self) -> u16 {
        self.index.get()
    }

    pub(crate) fn frost(&self) -> frost::Identifier {
        self.inner
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for Identifier {}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.index)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)
    }
}

/// The group verifying key, the only key a vault is ever bound to
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GroupKey(frost::VerifyingKey);

impl GroupKey {
    /// Compressed SEC1 encoding (33 bytes)
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        self.0
            .serialize()
            .map_err(|e| ProtocolError::Frost(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        frost::VerifyingKey::deserialize(bytes)
            .map(Self)
            .map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))
    }

    pub fn to_hex(&self) -> Result<String, ProtocolError> {
        self.to_bytes().map(hex::encode)
    }

    pub fn from_hex(s: &str) -> Result<Self, ProtocolError> {
        let bytes = hex::decode(s).map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub(crate) fn frost(&self) -> &frost::VerifyingKey {
        &self.0
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_hex() {
            Ok(h) => write!(f, "GroupKey({h})"),
            Err(_) => write!(f, "GroupKey(<unencodable>)"),
        }
    }
}

/// Public group information: verifying key, per-participant verifying shares, `t` and `n`
#[derive(Clone)]
pub struct PublicKeyPackage {
    inner: frost::keys::PublicKeyPackage,
    min_signers: u16,
    max_signers: u16,
}

impl PublicKeyPackage {
    pub(crate) fn new(
        inner: frost::keys::PublicKeyPackage,
        min_signers: u16,
        max_signers: u16,
    ) -> Self {
        Self {
            inner,
            min_signers,
            max_signers,
        }
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey(*self.inner.verifying_key())
    }

    pub fn min_signers(&self) -> u16 {
        self.min_signers
    }

    pub fn max_signers(&self) -> u16 {
        self.max_signers
    }

    /// Whether `id` holds a share in this group
    pub fn contains(&self, id: &Identifier) -> bool {
        self.inner.verifying_shares().contains_key(&id.frost())
    }

    /// All participants, ordered by index
    pub fn participants(&self) -> Vec<Identifier> {
        (1..=self.max_signers)
            .filter_map(|i| Identifier::from_index(i).ok())
            .filter(|id| self.contains(id))
            .collect()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ProtocolError> {
        self.inner
            .serialize()
            .map_err(|e| ProtocolError::Frost(e.to_string()))
    }

    pub fn deserialize(
        bytes: &[u8],
        min_signers: u16,
        max_signers: u16,
    ) -> Result<Self, ProtocolError> {
        check_threshold(max_signers, min_signers)?;
        let inner = frost::keys::PublicKeyPackage::deserialize(bytes)
            .map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))?;
        if inner.verifying_shares().len() != max_signers as usize {
            return Err(ProtocolError::InvalidEncoding(format!(
                "expected {} verifying shares, found {}",
                max_signers,
                inner.verifying_shares().len()
            )));
        }
        Ok(Self::new(inner, min_signers, max_signers))
    }

    pub(crate) fn frost(&self) -> &frost::keys::PublicKeyPackage {
        &self.inner
    }
}

impl fmt::Debug for PublicKeyPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKeyPackage")
            .field("group_key", &self.group_key())
            .field("min_signers", &self.min_signers)
            .field("max_signers", &self.max_signers)
            .finish()
    }
}

/// A dealt share, as handed to its participant
///
/// Not `Clone`: moving it into `into_key_package` is the only way to use it.
pub struct SecretShare {
    id: Identifier,
    inner: frost::keys::SecretShare,
}

impl SecretShare {
    pub fn identifier(&self) -> Identifier {
        self.id
    }

    /// Verify the share against the dealer's commitment and turn it into a key package
    pub fn into_key_package(self) -> Result<KeyPackage, ProtocolError> {
        let inner = frost::keys::KeyPackage::try_from(self.inner)
            .map_err(|e| ProtocolError::Frost(e.to_string()))?;
        Ok(KeyPackage { id: self.id, inner })
    }
}

impl fmt::Debug for SecretShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretShare({}, <redacted>)", self.id)
    }
}

/// A participant's long-term signing material
pub struct KeyPackage {
    id: Identifier,
    inner: frost::keys::KeyPackage,
}

impl KeyPackage {
    pub fn identifier(&self) -> Identifier {
        self.id
    }

    pub fn min_signers(&self) -> u16 {
        *self.inner.min_signers()
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey(*self.inner.verifying_key())
    }

    pub(crate) fn serialize(&self) -> Result<Vec<u8>, ProtocolError> {
        self.inner
            .serialize()
            .map_err(|e| ProtocolError::Frost(e.to_string()))
    }

    pub(crate) fn deserialize(index: u16, bytes: &[u8]) -> Result<Self, ProtocolError> {
        let id = Identifier::from_index(index)?;
        let inner = frost::keys::KeyPackage::deserialize(bytes)
            .map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))?;
        if *inner.identifier() != id.frost() {
            return Err(ProtocolError::InvalidEncoding(format!(
                "key package does not belong to participant {id}"
            )));
        }
        Ok(Self { id, inner })
    }

    pub(crate) fn frost(&self) -> &frost::keys::KeyPackage {
        &self.inner
    }
}

impl fmt::Debug for KeyPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPackage({}, <redacted>)", self.id)
    }
}

/// Shares and public package produced by the dealer
#[derive(Debug)]
pub struct DealerOutput {
    pub shares: BTreeMap<Identifier, SecretShare>,
    pub public_key_package: PublicKeyPackage,
}

impl DealerOutput {
    /// Convert every share into a key package, verifying each one
    pub fn into_key_packages(self) -> Result<(BTreeMap<Identifier, KeyPackage>, PublicKeyPackage), ProtocolError> {
        let mut packages = BTreeMap::new();
        for (id, share) in self.shares {
            packages.insert(id, share.into_key_package()?);
        }
        Ok((packages, self.public_key_package))
    }
}

fn check_threshold(max_signers: u16, min_signers: u16) -> Result<(), ProtocolError> {
    if min_signers < 2 || max_signers < 2 || min_signers > max_signers {
        return Err(ProtocolError::InvalidThreshold {
            min_signers,
            max_signers,
        });
    }
    Ok(())
}

fn deal(
    mut shares: BTreeMap<frost::Identifier, frost::keys::SecretShare>,
    pubkey_package: frost::keys::PublicKeyPackage,
    max_signers: u16,
    min_signers: u16,
) -> Result<DealerOutput, ProtocolError> {
    let mut dealt = BTreeMap::new();
    for index in 1..=max_signers {
        let id = Identifier::from_index(index)?;
        let share = shares
            .remove(&id.frost())
            .ok_or_else(|| ProtocolError::Frost(format!("dealer produced no share for {id}")))?;
        dealt.insert(id, SecretShare { id, inner: share });
    }

    tracing::debug!(max_signers, min_signers, "Dealt threshold key shares");

    Ok(DealerOutput {
        shares: dealt,
        public_key_package: PublicKeyPackage::new(pubkey_package, min_signers, max_signers),
    })
}

/// Sample a fresh group secret and deal `max_signers` shares with threshold `min_signers`
pub fn generate(max_signers: u16, min_signers: u16) -> Result<DealerOutput, ProtocolError> {
    check_threshold(max_signers, min_signers)?;
    let mut rng = OsRng;
    let (shares, pubkey_package) = frost::keys::generate_with_dealer(
        max_signers,
        min_signers,
        frost::keys::IdentifierList::Default,
        &mut rng,
    )
    .map_err(|e| ProtocolError::Frost(e.to_string()))?;
    deal(shares, pubkey_package, max_signers, min_signers)
}

/// Deal shares of an existing 32-byte big-endian secret scalar
pub fn split(secret: &[u8], max_signers: u16, min_signers: u16) -> Result<DealerOutput, ProtocolError> {
    check_threshold(max_signers, min_signers)?;
    if secret.len() != 32 {
        return Err(ProtocolError::InvalidEncoding(format!(
            "secret must be 32 bytes, got {}",
            secret.len()
        )));
    }
    let signing_key = frost::SigningKey::deserialize(secret)
        .map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))?;
    let mut rng = OsRng;
    let (shares, pubkey_package) = frost::keys::split(
        &signing_key,
        max_signers,
        min_signers,
        frost::keys::IdentifierList::Default,
        &mut rng,
    )
    .map_err(|e| ProtocolError::Frost(e.to_string()))?;
    deal(shares, pubkey_package, max_signers, min_signers)
}

/// `split` taking the secret as hex
pub fn split_hex(secret_hex: &str, max_signers: u16, min_signers: u16) -> Result<DealerOutput, ProtocolError> {
    let secret = hex::decode(secret_hex.trim().trim_start_matches("0x"))
        .map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))?;
    split(&secret, max_signers, min_signers)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "7f5b2a3c4d6e8f9001122334455667788990aabbccddeeff0011223344556677";

    #[test]
    fn test_generate_deals_one_share_per_participant() {
        let dealt = generate(5, 3).unwrap();
        assert_eq!(dealt.shares.len(), 5);
        assert_eq!(dealt.public_key_package.min_signers(), 3);
        assert_eq!(dealt.public_key_package.max_signers(), 5);

        let indexes: Vec<u16> = dealt.shares.keys().map(|id| id.index()).collect();
        assert_eq!(indexes, vec![1, 2, 3, 4, 5]);
        assert_eq!(dealt.public_key_package.participants().len(), 5);

        let group_key = dealt.public_key_package.group_key();
        let (packages, _) = dealt.into_key_packages().unwrap();
        for (id, package) in &packages {
            assert_eq!(package.identifier(), *id);
            assert_eq!(package.min_signers(), 3);
            assert_eq!(package.group_key(), group_key);
        }
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        for (n, t) in [(3u16, 4u16), (3, 1), (1, 1), (0, 0), (5, 0)] {
            match generate(n, t) {
                Err(ProtocolError::InvalidThreshold {
                    min_signers,
                    max_signers,
                }) => {
                    assert_eq!(min_signers, t);
                    assert_eq!(max_signers, n);
                }
                other => panic!("expected InvalidThreshold for {t}-of-{n}, got {other:?}"),
            }
        }

        let secret = hex::decode(SECRET).unwrap();
        assert!(matches!(
            split(&secret, 2, 3),
            Err(ProtocolError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_split_preserves_group_key() {
        let first = split_hex(SECRET, 5, 3).unwrap();
        let second = split_hex(&format!("0x{SECRET}"), 4, 2).unwrap();
        assert_eq!(
            first.public_key_package.group_key(),
            second.public_key_package.group_key()
        );

        let fresh = generate(5, 3).unwrap();
        assert_ne!(
            first.public_key_package.group_key(),
            fresh.public_key_package.group_key()
        );
    }

    #[test]
    fn test_split_rejects_bad_secret() {
        assert!(matches!(
            split(&[1u8; 31], 3, 2),
            Err(ProtocolError::InvalidEncoding(_))
        ));
        assert!(matches!(
            split_hex("not hex", 3, 2),
            Err(ProtocolError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_identifier_zero_rejected() {
        assert!(Identifier::from_index(0).is_err());
        let id = Identifier::from_index(7).unwrap();
        assert_eq!(id.index(), 7);
        assert_eq!(id.to_string(), "7");
        assert!(Identifier::from_index(2).unwrap() < id);
    }

    #[test]
    fn test_public_key_package_roundtrip() {
        let dealt = generate(3, 2).unwrap();
        let pkp = dealt.public_key_package;
        let bytes = pkp.serialize().unwrap();
        let restored = PublicKeyPackage::deserialize(&bytes, 2, 3).unwrap();
        assert_eq!(restored.group_key(), pkp.group_key());
        assert!(PublicKeyPackage::deserialize(&bytes, 2, 4).is_err());

        let hex_key = pkp.group_key().to_hex().unwrap();
        assert_eq!(GroupKey::from_hex(&hex_key).unwrap(), pkp.group_key());
    }

    #[test]
    fn test_secret_material_is_redacted() {
        let dealt = generate(3, 2).unwrap();
        let share = dealt.shares.values().next().unwrap();
        assert_eq!(format!("{share:?}"), "SecretShare(1, <redacted>)");
    }
}
