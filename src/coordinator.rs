//! Signing coordinator
//!
//! Drives a `SigningSession` over a set of participant endpoints. Both rounds fan
//! out concurrently and are bounded by the configured round timeout. The
//! coordinator only ever sees commitments and signature shares.

use crate::config::AssetmanConfig;
use crate::error::ProtocolError;
use crate::keys::{Identifier, PublicKeyPackage};
use crate::session::{SessionState, SigningSession};
use crate::signing::{Commitment, SignatureShare, Signer, SigningPackage};
use crate::verify::GroupSignature;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use uuid::Uuid;

/// A participant as seen by the coordinator
#[async_trait]
pub trait SignerEndpoint: Send + Sync {
    fn identifier(&self) -> Identifier;

    async fn round1(&self, session_id: Uuid) -> Result<Commitment, ProtocolError>;

    async fn round2(
        &self,
        session_id: Uuid,
        signing_package: &SigningPackage,
    ) -> Result<SignatureShare, ProtocolError>;

    /// Tell the participant to drop any nonces it holds for `session_id`
    async fn discard(&self, session_id: Uuid);
}

/// Endpoint for a signer living in the same process
#[derive(Debug, Clone)]
pub struct LocalEndpoint {
    signer: Arc<Signer>,
}

impl LocalEndpoint {
    pub fn new(signer: Arc<Signer>) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl SignerEndpoint for LocalEndpoint {
    fn identifier(&self) -> Identifier {
        self.signer.identifier()
    }

    async fn round1(&self, session_id: Uuid) -> Result<Commitment, ProtocolError> {
        self.signer.round1(session_id)
    }

    async fn round2(
        &self,
        session_id: Uuid,
        signing_package: &SigningPackage,
    ) -> Result<SignatureShare, ProtocolError> {
        self.signer.round2(session_id, signing_package)
    }

    async fn discard(&self, session_id: Uuid) {
        self.signer.discard(session_id);
    }
}

/// Runs signing sessions to completion or abort
#[derive(Debug, Clone)]
pub struct Coordinator {
    round_timeout: Duration,
}

impl Coordinator {
    pub fn new(round_timeout: Duration) -> Self {
        Self { round_timeout }
    }

    pub fn from_config(config: &AssetmanConfig) -> Self {
        Self::new(config.round_timeout)
    }

    pub fn round_timeout(&self) -> Duration {
        self.round_timeout
    }

    /// Produce a group signature over `message` with the given participants as quorum
    pub async fn sign(
        &self,
        public_key_package: &PublicKeyPackage,
        message: &[u8],
        endpoints: &[Arc<dyn SignerEndpoint>],
    ) -> Result<GroupSignature, ProtocolError> {
        let session_id = Uuid::new_v4();
        let quorum = endpoints.iter().map(|e| e.identifier());
        let mut session = SigningSession::new(
            session_id,
            public_key_package,
            quorum,
            message,
            self.round_timeout,
        )?;

        tracing::debug!(
            session_id = %session_id,
            signers = ?endpoints.iter().map(|e| e.identifier().index()).collect::<Vec<_>>(),
            "Starting FROST signing"
        );

        match self.run(&mut session, endpoints).await {
            Ok(signature) => {
                tracing::info!(session_id = %session_id, "FROST signing complete");
                Ok(signature)
            }
            Err(e) => {
                session.abort(e.clone());
                for endpoint in endpoints {
                    endpoint.discard(session_id).await;
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        session: &mut SigningSession,
        endpoints: &[Arc<dyn SignerEndpoint>],
    ) -> Result<GroupSignature, ProtocolError> {
        let session_id = session.id();
        session.begin(Instant::now())?;

        // Round 1
        let deadline = round_deadline(session)?;
        let mut round1 = JoinSet::new();
        for endpoint in endpoints {
            let endpoint = Arc::clone(endpoint);
            round1.spawn(async move { (endpoint.identifier(), endpoint.round1(session_id).await) });
        }

        while session.state() == &SessionState::Round1Collecting {
            match tokio::time::timeout_at(deadline, round1.join_next()).await {
                Ok(Some(Ok((_, Ok(commitment))))) => {
                    match session.add_commitment(commitment, Instant::now()) {
                        Ok(()) => {}
                        Err(ProtocolError::UnknownParticipant(id)) => {
                            tracing::warn!(session_id = %session_id, signer = %id, "Ignored commitment from outside the quorum");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(Some(Ok((id, Err(e))))) => {
                    tracing::warn!(session_id = %session_id, signer = %id, error = %e, "Round 1 failed for signer");
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Round 1 task failed");
                }
                Ok(None) | Err(_) => break,
            }
        }
        round1.abort_all();

        let package = Arc::new(session.close_round1(Instant::now())?.clone());

        // late responders are not in the package but may already hold nonces
        for endpoint in endpoints.iter().filter(|e| !package.contains(&e.identifier())) {
            tracing::debug!(
                session_id = %session_id,
                signer = %endpoint.identifier(),
                "Discarding nonces of late signer"
            );
            endpoint.discard(session_id).await;
        }

        tracing::debug!(
            session_id = %session_id,
            num_commitments = package.len(),
            "Round 1 complete"
        );

        // Round 2, every package member must answer
        let deadline = round_deadline(session)?;
        let mut round2 = JoinSet::new();
        for endpoint in endpoints.iter().filter(|e| package.contains(&e.identifier())) {
            let endpoint = Arc::clone(endpoint);
            let package = Arc::clone(&package);
            round2.spawn(async move {
                (
                    endpoint.identifier(),
                    endpoint.round2(session_id, &package).await,
                )
            });
        }

        while !session.is_ready() {
            match tokio::time::timeout_at(deadline, round2.join_next()).await {
                Ok(Some(Ok((_, Ok(share))))) => match session.add_signature_share(share) {
                    Ok(()) => {}
                    Err(ProtocolError::UnknownParticipant(id)) => {
                        tracing::warn!(session_id = %session_id, signer = %id, "Ignored share from outside the signing package");
                    }
                    Err(e) => return Err(e),
                },
                Ok(Some(Ok((id, Err(e))))) => {
                    tracing::warn!(session_id = %session_id, signer = %id, error = %e, "Round 2 failed for signer");
                    return Err(e);
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Round 2 task failed");
                    break;
                }
                Ok(None) | Err(_) => break,
            }
        }
        round2.abort_all();

        tracing::debug!(session_id = %session_id, "Round 2 complete");

        session.aggregate()
    }
}

fn round_deadline(session: &SigningSession) -> Result<tokio::time::Instant, ProtocolError> {
    session
        .deadline()
        .map(tokio::time::Instant::from_std)
        .ok_or(ProtocolError::InvalidState {
            operation: "wait for round",
            state: session.state().name(),
        })
}
