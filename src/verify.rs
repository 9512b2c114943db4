//! Group signature verification
//!
//! Verification never fails with an error: malformed input simply does not verify.

use crate::error::VerificationError;
use crate::keys::{GroupKey, PublicKeyPackage};
use frost_secp256k1_tr as frost;
use std::fmt;

/// Aggregated Schnorr signature (R, s), 64 bytes in BIP340 encoding
///
/// Equality compares the encoding. R is x-only on the wire, so the same
/// signature may be held with either R or -R.
#[derive(Clone, Copy)]
pub struct GroupSignature(frost::Signature);

impl GroupSignature {
    pub(crate) fn from_frost(signature: frost::Signature) -> Self {
        Self(signature)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, VerificationError> {
        self.0
            .serialize()
            .map_err(|e| VerificationError::MalformedSignature(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VerificationError> {
        frost::Signature::deserialize(bytes)
            .map(Self)
            .map_err(|e| VerificationError::MalformedSignature(e.to_string()))
    }

    pub fn to_hex(&self) -> Result<String, VerificationError> {
        self.to_bytes().map(hex::encode)
    }

    pub fn from_hex(s: &str) -> Result<Self, VerificationError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| VerificationError::MalformedSignature(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl PartialEq for GroupSignature {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_bytes(), other.to_bytes()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for GroupSignature {}

impl fmt::Debug for GroupSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_hex() {
            Ok(h) => write!(f, "GroupSignature({h})"),
            Err(_) => write!(f, "GroupSignature(<unencodable>)"),
        }
    }
}

/// Check `signature` over `message` against the group key of `public_key_package`
pub fn verify(signature: &GroupSignature, message: &[u8], public_key_package: &PublicKeyPackage) -> bool {
    verify_with_key(signature, message, &public_key_package.group_key())
}

/// Check `signature` over `message` against a bare group key
pub fn verify_with_key(signature: &GroupSignature, message: &[u8], group_key: &GroupKey) -> bool {
    group_key.frost().verify(message, &signature.0).is_ok()
}

/// Check an encoded signature; undecodable bytes do not verify
pub fn verify_bytes(signature: &[u8], message: &[u8], group_key: &GroupKey) -> bool {
    match GroupSignature::from_bytes(signature) {
        Ok(sig) => verify_with_key(&sig, message, group_key),
        Err(_) => false,
    }
}

/// `verify_with_key` as a `Result`, for gates that propagate errors
pub fn require_valid(
    signature: &GroupSignature,
    message: &[u8],
    group_key: &GroupKey,
) -> Result<(), VerificationError> {
    if verify_with_key(signature, message, group_key) {
        Ok(())
    } else {
        Err(VerificationError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{self, Identifier};
    use crate::signing::{aggregate, build_signing_package, commit, sign};
    use std::collections::BTreeMap;

    fn sign_with(quorum: &[u16], n: u16, t: u16, message: &[u8]) -> (GroupSignature, PublicKeyPackage) {
        let (packages, pkp) = keys::generate(n, t).unwrap().into_key_packages().unwrap();
        let mut nonces = BTreeMap::new();
        let mut commitments = BTreeMap::new();
        for index in quorum {
            let id = Identifier::from_index(*index).unwrap();
            let (pair, commitment) = commit(&packages[&id]);
            nonces.insert(id, pair);
            commitments.insert(id, commitment);
        }
        let package = build_signing_package(message, commitments).unwrap();
        let mut shares = BTreeMap::new();
        for (id, pair) in nonces {
            shares.insert(id, sign(&package, pair, &packages[&id]).unwrap());
        }
        (aggregate(&package, &shares, &pkp).unwrap(), pkp)
    }

    #[test]
    fn test_valid_signature_verifies() {
        let (sig, pkp) = sign_with(&[1, 3, 5], 5, 3, b"release 150");
        assert!(verify(&sig, b"release 150", &pkp));
        assert!(verify_with_key(&sig, b"release 150", &pkp.group_key()));
        assert!(require_valid(&sig, b"release 150", &pkp.group_key()).is_ok());
    }

    #[test]
    fn test_tampered_message_fails() {
        let message = b"release 150".to_vec();
        let (sig, pkp) = sign_with(&[2, 4, 5], 5, 3, &message);

        for byte in 0..message.len() {
            for bit in 0..8 {
                let mut tampered = message.clone();
                tampered[byte] ^= 1 << bit;
                assert!(!verify(&sig, &tampered, &pkp));
            }
        }
    }

    #[test]
    fn test_wrong_group_key_fails() {
        let (sig, _) = sign_with(&[1, 2], 3, 2, b"msg");
        let other = keys::generate(3, 2).unwrap().public_key_package;
        assert!(!verify(&sig, b"msg", &other));
        assert_eq!(
            require_valid(&sig, b"msg", &other.group_key()),
            Err(VerificationError::InvalidSignature)
        );
    }

    #[test]
    fn test_malformed_signature_returns_false() {
        let (sig, pkp) = sign_with(&[1, 2], 3, 2, b"msg");
        let key = pkp.group_key();

        let bytes = sig.to_bytes().unwrap();
        assert_eq!(bytes.len(), 64);
        assert!(verify_bytes(&bytes, b"msg", &key));

        assert!(!verify_bytes(&[], b"msg", &key));
        assert!(!verify_bytes(&bytes[..63], b"msg", &key));
        assert!(!verify_bytes(&[0xff; 64], b"msg", &key));

        assert!(matches!(
            GroupSignature::from_hex("zz"),
            Err(VerificationError::MalformedSignature(_))
        ));
        assert_eq!(GroupSignature::from_hex(&sig.to_hex().unwrap()).unwrap(), sig);
    }

    #[test]
    fn test_decoded_signature_equals_aggregate() {
        // enough signatures that both parities of R come up
        for _ in 0..16 {
            let (sig, pkp) = sign_with(&[1, 3], 3, 2, b"parity");
            let decoded = GroupSignature::from_bytes(&sig.to_bytes().unwrap()).unwrap();
            assert_eq!(decoded, sig);
            assert_eq!(decoded.to_hex().unwrap(), sig.to_hex().unwrap());
            assert!(verify(&decoded, b"parity", &pkp));
        }
    }
}
