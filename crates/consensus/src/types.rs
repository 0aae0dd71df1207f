//! Core types for PBFT rounds and wire messages

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConsensusError;

/// Content hash identifying a proposal
pub type Digest = Vec<u8>;

/// Validator identity (32-byte public key)
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
    Serialize, Deserialize,
)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

/// Position of a round: view number plus sequence.
///
/// Ordered by `(view_number, sequence)`. A view decoded off the wire may lack
/// its sequence; such a view is malformed and never matches a local round.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize,
    BorshDeserialize, Serialize, Deserialize,
)]
pub struct View {
    /// Advances on every view change
    pub view_number: u64,
    /// Advances on every committed proposal
    pub sequence: Option<u64>,
}

impl View {
    pub fn new(view_number: u64, sequence: u64) -> Self {
        Self {
            view_number,
            sequence: Some(sequence),
        }
    }

    /// Whether both fields are present
    pub fn is_complete(&self) -> bool {
        self.sequence.is_some()
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sequence {
            Some(sequence) => write!(f, "({}, {})", self.view_number, sequence),
            None => write!(f, "({}, nil)", self.view_number),
        }
    }
}

/// Client-submitted payload awaiting ordering
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Request {
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Application payload ordered by consensus
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Proposal {
    /// Sequence this proposal is bound to
    pub number: u64,
    /// Content hash over `number` and `payload`
    pub digest: Digest,
    /// Opaque application data
    pub payload: Vec<u8>,
}

impl Proposal {
    pub fn new(number: u64, payload: Vec<u8>, digest: Digest) -> Self {
        Self {
            number,
            digest,
            payload,
        }
    }

    /// Bytes the digest is computed over
    pub fn content_bytes(number: u64, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + payload.len());
        bytes.extend_from_slice(&number.to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }
}

/// Proposal announcement from the proposer
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Preprepare {
    pub view: View,
    pub proposal: Option<Proposal>,
}

/// Identifies one proposal within one round
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Subject {
    pub view: View,
    pub digest: Digest,
}

impl Subject {
    pub fn new(view: View, digest: Digest) -> Self {
        Self { view, digest }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.view, bs58::encode(&self.digest).into_string())
    }
}

/// Vote to move to a new view.
///
/// `view.view_number` is the target view, `view.sequence` the sender's last
/// committed sequence.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ViewChange {
    pub view: View,
}

/// Message kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    Preprepare,
    Prepare,
    Commit,
    ViewChange,
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageCode::Preprepare => "preprepare",
            MessageCode::Prepare => "prepare",
            MessageCode::Commit => "commit",
            MessageCode::ViewChange => "view-change",
        };
        f.write_str(name)
    }
}

/// Consensus message, one variant per code
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    Preprepare(Preprepare),
    Prepare(Subject),
    Commit(Subject),
    ViewChange(ViewChange),
}

impl Message {
    pub fn code(&self) -> MessageCode {
        match self {
            Message::Preprepare(_) => MessageCode::Preprepare,
            Message::Prepare(_) => MessageCode::Prepare,
            Message::Commit(_) => MessageCode::Commit,
            Message::ViewChange(_) => MessageCode::ViewChange,
        }
    }

    /// View the message refers to
    pub fn view(&self) -> View {
        match self {
            Message::Preprepare(preprepare) => preprepare.view,
            Message::Prepare(subject) | Message::Commit(subject) => subject.view,
            Message::ViewChange(vote) => vote.view,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ConsensusError> {
        borsh::to_vec(self).map_err(|e| ConsensusError::Encode(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ConsensusError> {
        borsh::from_slice(data).map_err(|e| ConsensusError::Decode(e.to_string()))
    }
}

/// Encoded message plus the sender's signature over it
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedMessage {
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ConsensusError> {
        borsh::to_vec(self).map_err(|e| ConsensusError::Encode(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ConsensusError> {
        borsh::from_slice(data).map_err(|e| ConsensusError::Decode(e.to_string()))
    }
}
