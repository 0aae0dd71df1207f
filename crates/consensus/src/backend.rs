//! Capabilities the core needs from the surrounding node

use crate::error::{BackendError, ConsensusError};
use crate::events::ConsensusEvent;
use crate::types::{Address, Digest, Message, Proposal, View};
use crate::validator::ValidatorSet;

/// Networking, signing, proposal checks and persistence supplied by the node.
///
/// Every call is made from inside a message handler and blocks it, so
/// implementations should return quickly. `broadcast` must deliver to the
/// local node as well: the core counts its own votes when they loop back.
pub trait Backend: Send {
    /// This node's validator address
    fn address(&self) -> Address;

    /// The fixed validator set
    fn validators(&self) -> &ValidatorSet;

    /// Hand an encoded message to the transport for one validator
    fn send(&self, payload: Vec<u8>, target: Address) -> Result<(), BackendError>;

    /// Hand an encoded message to the transport for every validator
    fn broadcast(&self, payload: Vec<u8>) -> Result<(), BackendError>;

    /// Application-level validity of a proposal
    fn verify(&self, proposal: &Proposal) -> Result<(), BackendError>;

    /// Finalize an agreed proposal
    fn commit(&self, proposal: &Proposal) -> Result<(), BackendError>;

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, BackendError>;

    fn check_signature(
        &self,
        data: &[u8],
        address: &Address,
        signature: &[u8],
    ) -> Result<(), BackendError>;

    /// Recover the signer of `data`
    fn check_validator_signature(
        &self,
        data: &[u8],
        signature: &[u8],
    ) -> Result<Address, BackendError>;

    fn is_proposer(&self, view: &View) -> bool {
        self.validators().is_proposer(&self.address(), view)
    }

    fn hash(&self, data: &[u8]) -> Digest {
        blake3::hash(data).as_bytes().to_vec()
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>, ConsensusError> {
        message.to_bytes()
    }

    fn decode(&self, data: &[u8]) -> Result<Message, ConsensusError> {
        Message::from_bytes(data)
    }

    /// Publish a consensus event to subscribers
    fn post(&self, _event: ConsensusEvent) {}

    fn save(&self, _key: &str, _value: &[u8]) -> Result<(), BackendError> {
        Ok(())
    }

    fn restore(&self, _key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(None)
    }
}
