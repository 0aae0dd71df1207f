//! Consensus errors

use thiserror::Error;

use crate::types::Address;

/// Failures reported by the backend collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Message rejections and local failures of the round state machine.
///
/// Every variant is a local decision: the message is dropped and the core's
/// state is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Failed to decode message: {0}")]
    Decode(String),

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Future message")]
    FutureMessage,

    #[error("Old message")]
    OldMessage,

    #[error("Message does not come from the proposer")]
    NotFromProposer,

    #[error("Invalid message")]
    InvalidMessage,

    #[error("Nil proposal")]
    NilProposal,

    #[error("Subject does not match")]
    SubjectNotMatched,

    #[error("Unknown validator {0}")]
    UnknownValidator(Address),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Persisted round state is corrupt: {0}")]
    Persistence(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ConsensusError {
    /// Whether the message may become valid once the local round catches up
    pub fn is_future(&self) -> bool {
        matches!(self, ConsensusError::FutureMessage)
    }
}
