//! Error taxonomy for assetman
//!
//! Signing failures are `ProtocolError`s and always end the session they occur in.
//! Withdrawal gate failures are `VerificationError`s. Custody state failures are
//! `LedgerError`s and are raised before any vault state changes.

use thiserror::Error;
use uuid::Uuid;

use crate::keys::Identifier;

/// What a caller can do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// Start an entirely new signing session with fresh nonces
    FreshSession,
    /// Resubmit with corrected funds, signature or sequence
    CorrectRequest,
    /// Policy violation, retrying the same operation cannot succeed
    NonRetryable,
}

/// Errors raised by key generation and the two-round signing protocol
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid threshold: {min_signers}-of-{max_signers} (need 2 <= t <= n)")]
    InvalidThreshold { min_signers: u16, max_signers: u16 },

    #[error("insufficient participants: required {required}, received {received}")]
    InsufficientParticipants { required: usize, received: usize },

    #[error("nonce pair for session {0} was already consumed")]
    NonceReuse(Uuid),

    #[error("invalid signature share from participant {culprit}")]
    InvalidShare { culprit: Identifier },

    #[error("participant {0} is not part of this group or quorum")]
    UnknownParticipant(Identifier),

    #[error("participant {0} sent a second message for the same round")]
    DuplicateMessage(Identifier),

    #[error("session {0} already has a nonce pair")]
    DuplicateSession(Uuid),

    #[error("signing package does not match the commitment of this nonce pair")]
    StalePackage,

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("FROST error: {0}")]
    Frost(String),
}

impl ProtocolError {
    pub fn retry_hint(&self) -> RetryHint {
        match self {
            ProtocolError::InvalidThreshold { .. } | ProtocolError::InvalidEncoding(_) => {
                RetryHint::NonRetryable
            }
            _ => RetryHint::FreshSession,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ProtocolError::InvalidThreshold { .. } => "INVALID_THRESHOLD",
            ProtocolError::InsufficientParticipants { .. } => "INSUFFICIENT_PARTICIPANTS",
            ProtocolError::NonceReuse(_) => "NONCE_REUSE",
            ProtocolError::InvalidShare { .. } => "INVALID_SHARE",
            ProtocolError::UnknownParticipant(_) => "UNKNOWN_PARTICIPANT",
            ProtocolError::DuplicateMessage(_) => "DUPLICATE_MESSAGE",
            ProtocolError::DuplicateSession(_) => "DUPLICATE_SESSION",
            ProtocolError::StalePackage => "STALE_PACKAGE",
            ProtocolError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            ProtocolError::InvalidState { .. } => "INVALID_STATE",
            ProtocolError::InvalidEncoding(_) => "INVALID_ENCODING",
            ProtocolError::Frost(_) => "FROST_ERROR",
        }
    }
}

/// Errors raised when a group signature does not authorize a message
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("group signature does not verify")]
    InvalidSignature,

    #[error("malformed signature: {0}")]
    MalformedSignature(String),
}

impl VerificationError {
    pub fn retry_hint(&self) -> RetryHint {
        RetryHint::CorrectRequest
    }
}

/// Errors raised by the custody ledger
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("vault not found: {0}")]
    VaultNotFound(Uuid),

    #[error("asset type mismatch: vault holds {expected}, got {actual}")]
    AssetTypeMismatch { expected: String, actual: String },

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },

    #[error("stale sequence: vault expects {expected}, authorization is for {actual}")]
    StaleSequence { expected: u64, actual: u64 },

    #[error("a vault for this asset type and group key already exists")]
    DuplicateVault,

    #[error("caller does not hold the admin capability of this ledger")]
    Unauthorized,

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("invalid asset type: {0}")]
    InvalidAssetType(String),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn retry_hint(&self) -> RetryHint {
        match self {
            LedgerError::AssetTypeMismatch { .. }
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::StaleSequence { .. }
            | LedgerError::ZeroAmount
            | LedgerError::InvalidAssetType(_)
            | LedgerError::Verification(_) => RetryHint::CorrectRequest,
            LedgerError::VaultNotFound(_)
            | LedgerError::DuplicateVault
            | LedgerError::Unauthorized
            | LedgerError::Overflow
            | LedgerError::Storage(_) => RetryHint::NonRetryable,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::VaultNotFound(_) => "VAULT_NOT_FOUND",
            LedgerError::AssetTypeMismatch { .. } => "ASSET_TYPE_MISMATCH",
            LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LedgerError::StaleSequence { .. } => "STALE_SEQUENCE",
            LedgerError::DuplicateVault => "DUPLICATE_VAULT",
            LedgerError::Unauthorized => "UNAUTHORIZED",
            LedgerError::ZeroAmount => "ZERO_AMOUNT",
            LedgerError::Overflow => "OVERFLOW",
            LedgerError::InvalidAssetType(_) => "INVALID_ASSET_TYPE",
            LedgerError::Verification(_) => "INVALID_SIGNATURE",
            LedgerError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

/// Root error type for the assetman binary and embedders
#[derive(Debug, Error)]
pub enum AssetmanError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("verification error: {0}")]
    Verification(#[from] VerificationError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    #[error("keystore error: {0}")]
    Keystore(#[from] crate::keystore::KeystoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AssetmanError {
    pub fn retry_hint(&self) -> RetryHint {
        match self {
            AssetmanError::Protocol(e) => e.retry_hint(),
            AssetmanError::Verification(e) => e.retry_hint(),
            AssetmanError::Ledger(e) => e.retry_hint(),
            AssetmanError::Config(_)
            | AssetmanError::Logging(_)
            | AssetmanError::Keystore(_)
            | AssetmanError::Io(_) => RetryHint::NonRetryable,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AssetmanError::Protocol(e) => e.error_code(),
            AssetmanError::Verification(_) => "INVALID_SIGNATURE",
            AssetmanError::Ledger(e) => e.error_code(),
            AssetmanError::Config(_) => "CONFIG_ERROR",
            AssetmanError::Logging(_) => "LOGGING_ERROR",
            AssetmanError::Keystore(_) => "KEYSTORE_ERROR",
            AssetmanError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using AssetmanError
pub type Result<T> = std::result::Result<T, AssetmanError>;
