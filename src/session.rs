//! Signing session state machine
//!
//! ```text
//! Created -> Round1Collecting -> Round2Collecting -> Aggregated
//!     \____________\___________________\__________> Aborted
//! ```
//!
//! A session signs exactly one message with one quorum. Every protocol error moves
//! it to `Aborted`, which drops all collected round state; a caller recovers by
//! starting a new session, never by resuming an old one.

use crate::error::ProtocolError;
use crate::keys::{Identifier, PublicKeyPackage};
use crate::signing::{self, Commitment, SignatureShare, SigningPackage};
use crate::verify::GroupSignature;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Round1Collecting,
    Round2Collecting,
    Aggregated,
    Aborted(ProtocolError),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Round1Collecting => "round1_collecting",
            SessionState::Round2Collecting => "round2_collecting",
            SessionState::Aggregated => "aggregated",
            SessionState::Aborted(_) => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Aggregated | SessionState::Aborted(_))
    }
}

/// Coordinator-side state of one signing session
#[derive(Debug)]
pub struct SigningSession {
    id: Uuid,
    public_key_package: PublicKeyPackage,
    message: Vec<u8>,
    quorum: BTreeSet<Identifier>,
    round_timeout: Duration,
    deadline: Option<Instant>,
    state: SessionState,
    commitments: BTreeMap<Identifier, Commitment>,
    package: Option<SigningPackage>,
    shares: BTreeMap<Identifier, SignatureShare>,
}

impl SigningSession {
    pub fn new(
        id: Uuid,
        public_key_package: &PublicKeyPackage,
        quorum: impl IntoIterator<Item = Identifier>,
        message: &[u8],
        round_timeout: Duration,
    ) -> Result<Self, ProtocolError> {
        let quorum: BTreeSet<Identifier> = quorum.into_iter().collect();
        if let Some(unknown) = quorum.iter().find(|id| !public_key_package.contains(id)) {
            return Err(ProtocolError::UnknownParticipant(*unknown));
        }

        let required = public_key_package.min_signers() as usize;
        if quorum.len() < required {
            return Err(ProtocolError::InsufficientParticipants {
                required,
                received: quorum.len(),
            });
        }

        Ok(Self {
            id,
            public_key_package: public_key_package.clone(),
            message: message.to_vec(),
            quorum,
            round_timeout,
            deadline: None,
            state: SessionState::Created,
            commitments: BTreeMap::new(),
            package: None,
            shares: BTreeMap::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    pub fn quorum(&self) -> &BTreeSet<Identifier> {
        &self.quorum
    }

    /// Deadline of the round currently collecting, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn signing_package(&self) -> Option<&SigningPackage> {
        self.package.as_ref()
    }

    fn invalid_state(&self, operation: &'static str) -> ProtocolError {
        ProtocolError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }

    /// Open round 1; commitments are accepted until `now + round_timeout`
    pub fn begin(&mut self, now: Instant) -> Result<(), ProtocolError> {
        if self.state != SessionState::Created {
            return Err(self.invalid_state("begin"));
        }
        self.state = SessionState::Round1Collecting;
        self.deadline = Some(now + self.round_timeout);
        tracing::debug!(
            session_id = %self.id,
            quorum = self.quorum.len(),
            "Signing session started"
        );
        Ok(())
    }

    /// Record a round-1 commitment
    ///
    /// A commitment from outside the quorum is refused without affecting the
    /// session. A second commitment from a quorum member aborts it. Once every
    /// quorum member has committed the signing package is fixed, and round 2
    /// runs until `now + round_timeout`.
    pub fn add_commitment(&mut self, commitment: Commitment, now: Instant) -> Result<(), ProtocolError> {
        if self.state != SessionState::Round1Collecting {
            return Err(self.invalid_state("add commitment"));
        }

        let id = commitment.identifier();
        if !self.quorum.contains(&id) {
            return Err(ProtocolError::UnknownParticipant(id));
        }
        if self.commitments.contains_key(&id) {
            return Err(self.abort(ProtocolError::DuplicateMessage(id)));
        }
        self.commitments.insert(id, commitment);

        if self.commitments.len() == self.quorum.len() {
            self.fix_package(now)?;
        }
        Ok(())
    }

    /// End round 1 at its deadline
    ///
    /// With at least `t` commitments the quorum narrows to the participants who
    /// answered; with fewer the session aborts.
    pub fn close_round1(&mut self, now: Instant) -> Result<&SigningPackage, ProtocolError> {
        if self.state == SessionState::Round1Collecting {
            let required = self.public_key_package.min_signers() as usize;
            if self.commitments.len() < required {
                let received = self.commitments.len();
                return Err(self.abort(ProtocolError::InsufficientParticipants { required, received }));
            }
            self.fix_package(now)?;
        }

        match (&self.state, &self.package) {
            (SessionState::Round2Collecting, Some(package)) => Ok(package),
            _ => Err(self.invalid_state("close round 1")),
        }
    }

    fn fix_package(&mut self, now: Instant) -> Result<(), ProtocolError> {
        let commitments = std::mem::take(&mut self.commitments);
        let responders: BTreeSet<Identifier> = commitments.keys().copied().collect();

        let package = match signing::build_signing_package(&self.message, commitments) {
            Ok(package) => package,
            Err(e) => return Err(self.abort(e)),
        };

        if responders.len() < self.quorum.len() {
            tracing::debug!(
                session_id = %self.id,
                from = self.quorum.len(),
                to = responders.len(),
                "Narrowed quorum to round 1 responders"
            );
        }

        self.quorum = responders;
        self.package = Some(package);
        self.state = SessionState::Round2Collecting;
        self.deadline = Some(now + self.round_timeout);
        Ok(())
    }

    /// Record a round-2 signature share
    pub fn add_signature_share(&mut self, share: SignatureShare) -> Result<(), ProtocolError> {
        if self.state != SessionState::Round2Collecting {
            return Err(self.invalid_state("add signature share"));
        }

        let id = share.identifier();
        if !self.quorum.contains(&id) {
            return Err(ProtocolError::UnknownParticipant(id));
        }
        if self.shares.contains_key(&id) {
            return Err(self.abort(ProtocolError::DuplicateMessage(id)));
        }
        self.shares.insert(id, share);
        Ok(())
    }

    /// Whether every member of the signing package has sent its share
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Round2Collecting && self.shares.len() == self.quorum.len()
    }

    /// Apply the deadline of the current round
    ///
    /// Round 1 closes (narrowing or aborting); round 2 aborts unless every share
    /// has arrived.
    pub fn poll(&mut self, now: Instant) -> &SessionState {
        let expired = self.deadline.map(|d| now >= d).unwrap_or(false);
        if expired {
            match self.state {
                SessionState::Round1Collecting => {
                    let _ = self.close_round1(now);
                }
                SessionState::Round2Collecting if !self.is_ready() => {
                    let required = self.quorum.len();
                    let received = self.shares.len();
                    self.abort(ProtocolError::InsufficientParticipants { required, received });
                }
                _ => {}
            }
        }
        &self.state
    }

    /// Combine the collected shares; the session is finished either way
    pub fn aggregate(&mut self) -> Result<GroupSignature, ProtocolError> {
        if self.state != SessionState::Round2Collecting {
            return Err(self.invalid_state("aggregate"));
        }
        if !self.is_ready() {
            let required = self.quorum.len();
            let received = self.shares.len();
            return Err(self.abort(ProtocolError::InsufficientParticipants { required, received }));
        }

        let result = match &self.package {
            Some(package) => signing::aggregate(package, &self.shares, &self.public_key_package),
            None => Err(self.invalid_state("aggregate")),
        };

        match result {
            Ok(signature) => {
                self.state = SessionState::Aggregated;
                self.clear();
                tracing::info!(session_id = %self.id, "Aggregated group signature");
                Ok(signature)
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    /// Move to `Aborted` and drop all round state. Returns `reason` for propagation.
    pub fn abort(&mut self, reason: ProtocolError) -> ProtocolError {
        if !self.state.is_terminal() {
            tracing::warn!(
                session_id = %self.id,
                state = self.state.name(),
                reason = %reason,
                "Signing session aborted"
            );
            self.state = SessionState::Aborted(reason.clone());
            self.clear();
        }
        reason
    }

    fn clear(&mut self) {
        self.commitments.clear();
        self.shares.clear();
        self.package = None;
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use crate::signing::Signer;
    use crate::verify;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn setup(n: u16, t: u16) -> (Vec<Signer>, PublicKeyPackage) {
        let (packages, pkp) = keys::generate(n, t).unwrap().into_key_packages().unwrap();
        (packages.into_values().map(Signer::new).collect(), pkp)
    }

    fn ids(signers: &[Signer]) -> Vec<Identifier> {
        signers.iter().map(|s| s.identifier()).collect()
    }

    #[test]
    fn test_happy_path_reaches_aggregated() {
        let (signers, pkp) = setup(5, 3);
        let quorum = &signers[1..4];
        let mut session =
            SigningSession::new(Uuid::new_v4(), &pkp, ids(quorum), b"message", TIMEOUT).unwrap();
        assert_eq!(session.state(), &SessionState::Created);

        session.begin(Instant::now()).unwrap();
        for signer in quorum {
            session.add_commitment(signer.round1(session.id()).unwrap(), Instant::now()).unwrap();
        }
        assert_eq!(session.state(), &SessionState::Round2Collecting);

        let package = session.signing_package().unwrap().clone();
        assert_eq!(package.len(), 3);
        for signer in quorum {
            session
                .add_signature_share(signer.round2(session.id(), &package).unwrap())
                .unwrap();
        }
        assert!(session.is_ready());

        let signature = session.aggregate().unwrap();
        assert!(verify::verify(&signature, b"message", &pkp));
        assert_eq!(session.state(), &SessionState::Aggregated);
        assert!(session.signing_package().is_none());

        assert_eq!(
            session.aggregate().unwrap_err(),
            ProtocolError::InvalidState {
                operation: "aggregate",
                state: "aggregated"
            }
        );
    }

    #[test]
    fn test_quorum_below_threshold_rejected() {
        let (signers, pkp) = setup(5, 3);
        let result = SigningSession::new(Uuid::new_v4(), &pkp, ids(&signers[..2]), b"m", TIMEOUT);
        assert_eq!(
            result.unwrap_err(),
            ProtocolError::InsufficientParticipants {
                required: 3,
                received: 2
            }
        );
    }

    #[test]
    fn test_foreign_participant_rejected() {
        let (_, pkp) = setup(3, 2);
        let stranger = Identifier::from_index(9).unwrap();
        let quorum = vec![Identifier::from_index(1).unwrap(), stranger];
        let result = SigningSession::new(Uuid::new_v4(), &pkp, quorum, b"m", TIMEOUT);
        assert_eq!(result.unwrap_err(), ProtocolError::UnknownParticipant(stranger));
    }

    #[test]
    fn test_round1_timeout_with_threshold_narrows_quorum() {
        let (signers, pkp) = setup(5, 3);
        let mut session =
            SigningSession::new(Uuid::new_v4(), &pkp, ids(&signers), b"m", TIMEOUT).unwrap();
        let start = Instant::now();
        session.begin(start).unwrap();

        for signer in &signers[..3] {
            session.add_commitment(signer.round1(session.id()).unwrap(), Instant::now()).unwrap();
        }
        assert_eq!(session.poll(start), &SessionState::Round1Collecting);
        assert_eq!(
            session.poll(start + TIMEOUT),
            &SessionState::Round2Collecting
        );
        assert_eq!(session.quorum().len(), 3);
        assert_eq!(session.signing_package().unwrap().len(), 3);
    }

    #[test]
    fn test_round1_timeout_below_threshold_aborts() {
        let (signers, pkp) = setup(5, 3);
        let mut session =
            SigningSession::new(Uuid::new_v4(), &pkp, ids(&signers), b"m", TIMEOUT).unwrap();
        let start = Instant::now();
        session.begin(start).unwrap();
        for signer in &signers[..2] {
            session.add_commitment(signer.round1(session.id()).unwrap(), Instant::now()).unwrap();
        }

        let err = session.close_round1(start + TIMEOUT).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InsufficientParticipants {
                required: 3,
                received: 2
            }
        );
        assert_eq!(session.state(), &SessionState::Aborted(err));
    }

    #[test]
    fn test_duplicate_commitment_aborts() {
        let (signers, pkp) = setup(3, 2);
        let mut session =
            SigningSession::new(Uuid::new_v4(), &pkp, ids(&signers), b"m", TIMEOUT).unwrap();
        session.begin(Instant::now()).unwrap();

        let first = signers[0].round1(session.id()).unwrap();
        let id = first.identifier();
        session.add_commitment(first.clone(), Instant::now()).unwrap();
        assert_eq!(
            session.add_commitment(first, Instant::now()).unwrap_err(),
            ProtocolError::DuplicateMessage(id)
        );
        assert!(matches!(session.state(), SessionState::Aborted(_)));

        assert!(matches!(
            session.add_commitment(signers[1].round1(session.id()).unwrap(), Instant::now()),
            Err(ProtocolError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_commitment_before_begin_rejected() {
        let (signers, pkp) = setup(3, 2);
        let mut session =
            SigningSession::new(Uuid::new_v4(), &pkp, ids(&signers), b"m", TIMEOUT).unwrap();
        let result = session.add_commitment(signers[0].round1(session.id()).unwrap(), Instant::now());
        assert_eq!(
            result.unwrap_err(),
            ProtocolError::InvalidState {
                operation: "add commitment",
                state: "created"
            }
        );
        assert_eq!(session.state(), &SessionState::Created);
    }

    #[test]
    fn test_round2_timeout_aborts() {
        let (signers, pkp) = setup(3, 2);
        let quorum = &signers[..2];
        let mut session =
            SigningSession::new(Uuid::new_v4(), &pkp, ids(quorum), b"m", TIMEOUT).unwrap();
        session.begin(Instant::now()).unwrap();
        for signer in quorum {
            session.add_commitment(signer.round1(session.id()).unwrap(), Instant::now()).unwrap();
        }
        let package = session.signing_package().unwrap().clone();
        session
            .add_signature_share(quorum[0].round2(session.id(), &package).unwrap())
            .unwrap();

        let deadline = session.deadline().unwrap();
        assert_eq!(
            session.poll(deadline),
            &SessionState::Aborted(ProtocolError::InsufficientParticipants {
                required: 2,
                received: 1
            })
        );
        assert!(session.signing_package().is_none());
    }

    #[test]
    fn test_share_from_outside_package_refused() {
        let (signers, pkp) = setup(3, 2);
        let quorum = &signers[..2];
        let mut session =
            SigningSession::new(Uuid::new_v4(), &pkp, ids(quorum), b"m", TIMEOUT).unwrap();
        session.begin(Instant::now()).unwrap();
        for signer in quorum {
            session.add_commitment(signer.round1(session.id()).unwrap(), Instant::now()).unwrap();
        }

        // participant 3 signs a package of its own over the same message
        let other_id = Uuid::new_v4();
        let mut commitments = BTreeMap::new();
        for signer in &signers[1..] {
            commitments.insert(signer.identifier(), signer.round1(other_id).unwrap());
        }
        let other_package = signing::build_signing_package(b"m", commitments).unwrap();
        let outsider = signers[2].round2(other_id, &other_package).unwrap();

        assert_eq!(
            session.add_signature_share(outsider).unwrap_err(),
            ProtocolError::UnknownParticipant(signers[2].identifier())
        );
        assert_eq!(session.state(), &SessionState::Round2Collecting);
    }

    #[test]
    fn test_full_round1_sets_round2_deadline_from_caller_clock() {
        let (signers, pkp) = setup(3, 2);
        let quorum = &signers[..2];
        let mut session =
            SigningSession::new(Uuid::new_v4(), &pkp, ids(quorum), b"m", TIMEOUT).unwrap();
        let start = Instant::now();
        session.begin(start).unwrap();

        let last_commit = start + Duration::from_secs(7);
        for signer in quorum {
            session
                .add_commitment(signer.round1(session.id()).unwrap(), last_commit)
                .unwrap();
        }
        assert_eq!(session.state(), &SessionState::Round2Collecting);
        assert_eq!(session.deadline(), Some(last_commit + TIMEOUT));

        assert_eq!(
            session.poll(last_commit + TIMEOUT - Duration::from_secs(1)),
            &SessionState::Round2Collecting
        );
        assert!(matches!(
            session.poll(last_commit + TIMEOUT),
            SessionState::Aborted(ProtocolError::InsufficientParticipants { .. })
        ));
    }
}
