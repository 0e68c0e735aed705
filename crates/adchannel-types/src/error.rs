//! Error types for the AdChannel state channel.
//!
//! All errors use the `AC_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by failure class:
//! - 1xx: Validation errors (malformed input, rejected before any mutation)
//! - 2xx: Sequence errors (update does not extend the chain; parked, not fatal)
//! - 3xx: Signature errors (recovered address mismatch; message discarded)
//! - 4xx: Proof errors (merkle proof does not authenticate the claim)
//! - 5xx: Timeout violations (retryable precondition failures)
//! - 6xx: Contract and registry errors
//! - 9xx: General / internal errors

use primitive_types::U256;
use thiserror::Error;

use crate::{Address, ChannelId, ChannelState, ImpressionId};

/// Failure class, matching the protocol's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Sequence,
    Signature,
    Proof,
    Timeout,
    Contract,
    Internal,
}

/// Central error enum for all AdChannel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// The update is malformed (non-positive price, missing id).
    #[error("AC_ERR_100: Invalid update: {reason}")]
    InvalidUpdate { reason: String },

    /// A value could not be canonicalized for hashing or decoding.
    #[error("AC_ERR_101: Invalid encoding: {reason}")]
    InvalidEncoding { reason: String },

    /// No local channel with this id (or for this party pair).
    #[error("AC_ERR_102: Unknown channel: {0}")]
    UnknownChannel(ChannelId),

    /// The channel is in a state that does not allow the operation.
    #[error("AC_ERR_103: Channel {channel_id} is {state}")]
    ChannelNotOpen { channel_id: ChannelId, state: ChannelState },

    /// An event was addressed to a channel this node already tracks.
    #[error("AC_ERR_104: Channel already open: {0}")]
    ChannelAlreadyOpen(ChannelId),

    /// No tracked channel carries traffic between this pair.
    #[error("AC_ERR_105: No channel between demand {demand} and supply {supply}")]
    NoChannelBetween { demand: Address, supply: Address },

    // =================================================================
    // Sequence Errors (2xx)
    // =================================================================
    /// The update does not directly extend the current chain.
    #[error("AC_ERR_200: Out of sequence: expected impressions {expected}, got {got}")]
    OutOfSequence { expected: U256, got: U256 },

    /// The update was already consumed.
    #[error("AC_ERR_201: Duplicate update at impressions {impressions}")]
    DuplicateUpdate { impressions: U256 },

    /// The update's counters or root do not chain from the current head.
    #[error("AC_ERR_202: Hash chain broken at impressions {impressions}")]
    HashChainBroken { impressions: U256 },

    // =================================================================
    // Signature Errors (3xx)
    // =================================================================
    /// The signature recovered to someone other than the expected signer.
    #[error("AC_ERR_300: Signature mismatch: expected {expected}, recovered {recovered}")]
    SignatureMismatch { expected: Address, recovered: Address },

    /// The signature bytes could not be parsed.
    #[error("AC_ERR_301: Malformed signature: {reason}")]
    MalformedSignature { reason: String },

    /// A signature was required but absent.
    #[error("AC_ERR_302: Missing signature on update {0}")]
    MissingSignature(ImpressionId),

    /// The role needs a signing key it was not given.
    #[error("AC_ERR_303: No signing key configured")]
    MissingSigningKey,

    /// The secret key bytes are not a valid secp256k1 scalar.
    #[error("AC_ERR_304: Invalid secret key: {reason}")]
    InvalidSecretKey { reason: String },

    // =================================================================
    // Proof Errors (4xx)
    // =================================================================
    /// The merkle proof does not authenticate the claimed leaf.
    #[error("AC_ERR_400: Proof rejected: {reason}")]
    ProofRejected { reason: String },

    /// A challenge or accept did not strictly increase the count.
    #[error("AC_ERR_401: Count not higher: claimed {claimed}, must exceed {current}")]
    CountNotHigher { claimed: U256, current: U256 },

    // =================================================================
    // Timeout Violations (5xx)
    // =================================================================
    /// Checkpoint attempted before the challenge window ended.
    #[error("AC_ERR_500: Challenge period active: block {now}, window ends at {challenge_timeout}")]
    ChallengePeriodActive { now: u64, challenge_timeout: u64 },

    /// Challenge attempted after the window already ended.
    #[error("AC_ERR_501: Challenge window closed at block {challenge_timeout} (now {now})")]
    ChallengeWindowClosed { now: u64, challenge_timeout: u64 },

    // =================================================================
    // Contract Errors (6xx)
    // =================================================================
    /// The caller is not one of the channel's parties.
    #[error("AC_ERR_600: Not a channel party: {0}")]
    NotAParty(Address),

    /// Only the proposer may accept a challenge.
    #[error("AC_ERR_601: Caller {0} is not the checkpoint proposer")]
    NotProposer(Address),

    /// No checkpoint is pending on this channel.
    #[error("AC_ERR_602: No checkpoint pending on {0}")]
    NoCheckpointPending(ChannelId),

    /// No challenge is open on this channel.
    #[error("AC_ERR_603: No open challenge on {0}")]
    NoChallenge(ChannelId),

    /// The address is not registered for the required role.
    #[error("AC_ERR_604: Not registered: {0}")]
    NotRegistered(Address),

    /// Generic contract rejection surfaced from a collaborator.
    #[error("AC_ERR_605: Contract rejected call: {reason}")]
    ContractRejected { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("AC_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("AC_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("AC_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// Persistence collaborator failed.
    #[error("AC_ERR_903: Store error: {0}")]
    Store(String),
}

impl ChannelError {
    /// Taxonomy class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUpdate { .. }
            | Self::InvalidEncoding { .. }
            | Self::UnknownChannel(_)
            | Self::ChannelNotOpen { .. }
            | Self::ChannelAlreadyOpen(_)
            | Self::NoChannelBetween { .. } => ErrorKind::Validation,
            Self::OutOfSequence { .. }
            | Self::DuplicateUpdate { .. }
            | Self::HashChainBroken { .. } => ErrorKind::Sequence,
            Self::SignatureMismatch { .. }
            | Self::MalformedSignature { .. }
            | Self::MissingSignature(_)
            | Self::MissingSigningKey
            | Self::InvalidSecretKey { .. } => ErrorKind::Signature,
            Self::ProofRejected { .. } | Self::CountNotHigher { .. } => ErrorKind::Proof,
            Self::ChallengePeriodActive { .. } | Self::ChallengeWindowClosed { .. } => {
                ErrorKind::Timeout
            }
            Self::NotAParty(_)
            | Self::NotProposer(_)
            | Self::NoCheckpointPending(_)
            | Self::NoChallenge(_)
            | Self::NotRegistered(_)
            | Self::ContractRejected { .. } => ErrorKind::Contract,
            Self::Internal(_)
            | Self::Serialization(_)
            | Self::Configuration(_)
            | Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same call later can succeed unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ChallengePeriodActive { .. })
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, ChannelError>;

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
