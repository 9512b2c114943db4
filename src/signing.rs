//! FROST signing rounds
//!
//! Round 1 (`commit`) produces a single-use nonce pair and its public commitment.
//! Round 2 (`sign`) consumes the nonce pair by value and produces a signature share
//! bound to one `SigningPackage`. `aggregate` combines the shares of a package into a
//! group signature.
//!
//! `Signer` is the participant side: it holds one key package, keeps pending nonces
//! per session and never hands the same nonces out twice.

use crate::error::ProtocolError;
use crate::keys::{GroupKey, Identifier, KeyPackage, PublicKeyPackage};
use crate::verify::GroupSignature;
use frost_secp256k1_tr as frost;
use rand::rngs::OsRng;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Public round-1 message of one participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    id: Identifier,
    inner: frost::round1::SigningCommitments,
}

impl Commitment {
    pub fn identifier(&self) -> Identifier {
        self.id
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        self.inner
            .serialize()
            .map_err(|e| ProtocolError::Frost(e.to_string()))
    }

    pub fn from_bytes(id: Identifier, bytes: &[u8]) -> Result<Self, ProtocolError> {
        let inner = frost::round1::SigningCommitments::deserialize(bytes)
            .map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))?;
        Ok(Self { id, inner })
    }
}

/// Secret round-1 state of one participant
///
/// Neither `Clone` nor `Copy`: `sign` takes it by value, so a nonce pair can be
/// spent at most once. The underlying nonces are zeroized when dropped.
pub struct NoncePair {
    id: Identifier,
    nonces: frost::round1::SigningNonces,
    commitment: Commitment,
}

impl NoncePair {
    pub fn identifier(&self) -> Identifier {
        self.id
    }

    pub fn commitment(&self) -> &Commitment {
        &self.commitment
    }
}

impl fmt::Debug for NoncePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NoncePair({}, <redacted>)", self.id)
    }
}

/// The message and the exact quorum of one signing session
#[derive(Debug, Clone)]
pub struct SigningPackage {
    message: Vec<u8>,
    commitments: BTreeMap<Identifier, Commitment>,
    inner: frost::SigningPackage,
}

impl SigningPackage {
    pub fn new(
        message: &[u8],
        commitments: BTreeMap<Identifier, Commitment>,
    ) -> Result<Self, ProtocolError> {
        if commitments.is_empty() {
            return Err(ProtocolError::InsufficientParticipants {
                required: 1,
                received: 0,
            });
        }

        let mut frost_commitments = BTreeMap::new();
        for (id, commitment) in &commitments {
            if commitment.id != *id {
                return Err(ProtocolError::UnknownParticipant(commitment.id));
            }
            frost_commitments.insert(id.frost(), commitment.inner.clone());
        }

        Ok(Self {
            message: message.to_vec(),
            commitments,
            inner: frost::SigningPackage::new(frost_commitments, message),
        })
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    pub fn participants(&self) -> impl Iterator<Item = Identifier> + '_ {
        self.commitments.keys().copied()
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.commitments.contains_key(id)
    }

    pub fn commitment(&self, id: &Identifier) -> Option<&Commitment> {
        self.commitments.get(id)
    }

    pub fn len(&self) -> usize {
        self.commitments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commitments.is_empty()
    }
}

/// `SigningPackage::new` under its protocol name
pub fn build_signing_package(
    message: &[u8],
    commitments: BTreeMap<Identifier, Commitment>,
) -> Result<SigningPackage, ProtocolError> {
    SigningPackage::new(message, commitments)
}

/// One participant's partial signature
#[derive(Debug, Clone)]
pub struct SignatureShare {
    id: Identifier,
    inner: frost::round2::SignatureShare,
}

impl SignatureShare {
    pub fn identifier(&self) -> Identifier {
        self.id
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.serialize()
    }

    pub fn from_bytes(id: Identifier, bytes: &[u8]) -> Result<Self, ProtocolError> {
        let inner = frost::round2::SignatureShare::deserialize(bytes)
            .map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))?;
        Ok(Self { id, inner })
    }
}

/// Round 1: generate a fresh nonce pair and its commitment
pub fn commit(key_package: &KeyPackage) -> (NoncePair, Commitment) {
    let mut rng = OsRng;
    let (nonces, commitments) = frost::round1::commit(key_package.frost().signing_share(), &mut rng);
    let commitment = Commitment {
        id: key_package.identifier(),
        inner: commitments,
    };
    let pair = NoncePair {
        id: key_package.identifier(),
        nonces,
        commitment: commitment.clone(),
    };
    (pair, commitment)
}

/// Round 2: compute this participant's signature share over `signing_package`
///
/// Consumes the nonce pair whatever the outcome.
pub fn sign(
    signing_package: &SigningPackage,
    nonce_pair: NoncePair,
    key_package: &KeyPackage,
) -> Result<SignatureShare, ProtocolError> {
    let id = key_package.identifier();
    if nonce_pair.id != id {
        return Err(ProtocolError::UnknownParticipant(nonce_pair.id));
    }

    let required = key_package.min_signers() as usize;
    if signing_package.len() < required {
        return Err(ProtocolError::InsufficientParticipants {
            required,
            received: signing_package.len(),
        });
    }

    match signing_package.commitment(&id) {
        Some(c) if *c == nonce_pair.commitment => {}
        Some(_) => return Err(ProtocolError::StalePackage),
        None => return Err(ProtocolError::UnknownParticipant(id)),
    }

    let inner = frost::round2::sign(&signing_package.inner, &nonce_pair.nonces, key_package.frost())
        .map_err(|e| ProtocolError::Frost(e.to_string()))?;

    Ok(SignatureShare { id, inner })
}

/// Combine the shares of every package member into a group signature
///
/// A share that fails its own verification equation is reported as
/// `InvalidShare` naming the participant.
pub fn aggregate(
    signing_package: &SigningPackage,
    shares: &BTreeMap<Identifier, SignatureShare>,
    public_key_package: &PublicKeyPackage,
) -> Result<GroupSignature, ProtocolError> {
    let required = public_key_package.min_signers() as usize;
    if signing_package.len() < required {
        return Err(ProtocolError::InsufficientParticipants {
            required,
            received: signing_package.len(),
        });
    }

    for id in shares.keys() {
        if !signing_package.contains(id) {
            return Err(ProtocolError::UnknownParticipant(*id));
        }
    }
    if shares.len() != signing_package.len() {
        return Err(ProtocolError::InsufficientParticipants {
            required: signing_package.len(),
            received: shares.len(),
        });
    }

    let frost_shares: BTreeMap<_, _> = shares
        .iter()
        .map(|(id, share)| (id.frost(), share.inner))
        .collect();

    let signature = frost::aggregate(&signing_package.inner, &frost_shares, public_key_package.frost())
        .map_err(|e| match e.culprit() {
            Some(culprit) => shares
                .keys()
                .find(|id| id.frost() == culprit)
                .map(|id| ProtocolError::InvalidShare { culprit: *id })
                .unwrap_or_else(|| ProtocolError::Frost(e.to_string())),
            None => ProtocolError::Frost(e.to_string()),
        })?;

    Ok(GroupSignature::from_frost(signature))
}

/// Nonces waiting for round 2
struct PendingNonces {
    pair: NoncePair,
    created_at: Instant,
}

#[derive(Default)]
struct SignerState {
    pending: HashMap<Uuid, PendingNonces>,
    /// Sessions whose nonces were consumed or discarded
    spent: HashMap<Uuid, Instant>,
}

/// Participant-side signing actor
pub struct Signer {
    key_package: KeyPackage,
    state: Mutex<SignerState>,
}

impl Signer {
    pub fn new(key_package: KeyPackage) -> Self {
        Self {
            key_package,
            state: Mutex::new(SignerState::default()),
        }
    }

    pub fn identifier(&self) -> Identifier {
        self.key_package.identifier()
    }

    pub fn group_key(&self) -> GroupKey {
        self.key_package.group_key()
    }

    fn state(&self) -> MutexGuard<'_, SignerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Round 1: generate and remember nonces for `session_id`
    pub fn round1(&self, session_id: Uuid) -> Result<Commitment, ProtocolError> {
        let mut state = self.state();
        if state.pending.contains_key(&session_id) || state.spent.contains_key(&session_id) {
            return Err(ProtocolError::DuplicateSession(session_id));
        }

        let (pair, commitment) = commit(&self.key_package);
        state.pending.insert(
            session_id,
            PendingNonces {
                pair,
                created_at: Instant::now(),
            },
        );

        tracing::debug!(
            signer = %self.identifier(),
            session_id = %session_id,
            "Generated round 1 commitment"
        );

        Ok(commitment)
    }

    /// Round 2: sign `signing_package` with the nonces of `session_id`
    ///
    /// The nonces are removed before signing, so a failed or repeated call can
    /// never reach them again.
    pub fn round2(
        &self,
        session_id: Uuid,
        signing_package: &SigningPackage,
    ) -> Result<SignatureShare, ProtocolError> {
        let pending = {
            let mut state = self.state();
            if state.spent.contains_key(&session_id) {
                tracing::warn!(
                    signer = %self.identifier(),
                    session_id = %session_id,
                    "Rejected round 2 for consumed nonces"
                );
                return Err(ProtocolError::NonceReuse(session_id));
            }
            let pending = state
                .pending
                .remove(&session_id)
                .ok_or(ProtocolError::SessionNotFound(session_id))?;
            state.spent.insert(session_id, Instant::now());
            pending
        };

        let share = sign(signing_package, pending.pair, &self.key_package)?;

        tracing::debug!(
            signer = %self.identifier(),
            session_id = %session_id,
            "Generated round 2 signature share"
        );

        Ok(share)
    }

    /// Drop the nonces of an aborted session. Returns whether any were pending.
    pub fn discard(&self, session_id: Uuid) -> bool {
        let mut state = self.state();
        let removed = state.pending.remove(&session_id).is_some();
        state.spent.entry(session_id).or_insert_with(Instant::now);
        if removed {
            tracing::debug!(
                signer = %self.identifier(),
                session_id = %session_id,
                "Discarded unused nonces"
            );
        }
        removed
    }

    /// Expire pending nonces and spent-session records older than `ttl`
    pub fn cleanup_sessions(&self, ttl: Duration) -> usize {
        let mut state = self.state();
        let now = Instant::now();

        let expired: Vec<Uuid> = state
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.created_at) >= ttl)
            .map(|(id, _)| *id)
            .collect();
        for session_id in &expired {
            state.pending.remove(session_id);
            state.spent.insert(*session_id, now);
        }

        state
            .spent
            .retain(|_, spent_at| now.duration_since(*spent_at) < ttl);

        expired.len()
    }

    /// Run `cleanup_sessions(ttl)` in the background every half `ttl`
    ///
    /// The task ends once the last `Arc` to the signer is dropped.
    pub fn spawn_expiry(signer: &Arc<Signer>, ttl: Duration) -> tokio::task::JoinHandle<()> {
        let signer = Arc::downgrade(signer);
        let period = (ttl / 2).max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(signer) = signer.upgrade() else {
                    break;
                };
                let expired = signer.cleanup_sessions(ttl);
                if expired > 0 {
                    tracing::debug!(
                        signer = %signer.identifier(),
                        expired,
                        "Expired unused nonces"
                    );
                }
            }
        })
    }

    /// Number of sessions holding unused nonces
    pub fn active_sessions(&self) -> usize {
        self.state().pending.len()
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("identifier", &self.identifier())
            .field("active_sessions", &self.active_sessions())
            .finish()
    }
}
