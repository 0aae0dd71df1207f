//! In-process backend: ed25519 signing, channel transport, sled or memory storage

use std::collections::HashMap;
use std::sync::Arc;

use ed25519_dalek::{
    Signature, Signer, SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
};
use parking_lot::{Mutex, RwLock};
use pbft_consensus::{
    Address, Backend, BackendError, ConsensusEvent, EngineHandle, EventBus, Proposal,
    ValidatorSet,
};
use tracing::{debug, trace};

use crate::store::RoundStore;

/// Signatures carry the signer's public key followed by the ed25519 signature
pub const SIGNATURE_BYTES: usize = PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH;

/// Live engines reachable by address
pub type Network = Arc<RwLock<HashMap<Address, EngineHandle>>>;

pub fn address_of(key: &VerifyingKey) -> Address {
    Address::new(key.to_bytes())
}

/// Where a validator keeps its round state
pub enum RoundStorage {
    Disk(RoundStore),
    Memory(Mutex<HashMap<String, Vec<u8>>>),
}

impl RoundStorage {
    pub fn memory() -> Self {
        Self::Memory(Mutex::new(HashMap::new()))
    }
}

pub struct LocalBackend {
    signing_key: SigningKey,
    address: Address,
    validators: ValidatorSet,
    network: Network,
    storage: RoundStorage,
    bus: EventBus,
    /// Proposals committed since start, in sequence order
    ledger: Mutex<Vec<Proposal>>,
}

impl LocalBackend {
    pub fn new(
        signing_key: SigningKey,
        validators: ValidatorSet,
        network: Network,
        storage: RoundStorage,
        bus: EventBus,
    ) -> Self {
        let address = address_of(&signing_key.verifying_key());
        Self {
            signing_key,
            address,
            validators,
            network,
            storage,
            bus,
            ledger: Mutex::new(Vec::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn ledger(&self) -> Vec<Proposal> {
        self.ledger.lock().clone()
    }

    fn deliver(&self, target: &Address, handle: &EngineHandle, payload: Vec<u8>) {
        if let Err(e) = handle.try_deliver(payload) {
            debug!(to = %target, "Dropped outbound message: {}", e);
        }
    }
}

fn split_signature(signature: &[u8]) -> Result<(VerifyingKey, Signature), BackendError> {
    if signature.len() != SIGNATURE_BYTES {
        return Err(BackendError::Signature(format!(
            "expected {} signature bytes, got {}",
            SIGNATURE_BYTES,
            signature.len()
        )));
    }
    let (key, sig) = signature.split_at(PUBLIC_KEY_LENGTH);
    let key: [u8; PUBLIC_KEY_LENGTH] = key
        .try_into()
        .map_err(|_| BackendError::Signature("bad public key".to_string()))?;
    let sig: [u8; SIGNATURE_LENGTH] = sig
        .try_into()
        .map_err(|_| BackendError::Signature("bad signature".to_string()))?;
    let key = VerifyingKey::from_bytes(&key).map_err(|e| BackendError::Signature(e.to_string()))?;
    Ok((key, Signature::from_bytes(&sig)))
}

impl Backend for LocalBackend {
    fn address(&self) -> Address {
        self.address
    }

    fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    fn send(&self, payload: Vec<u8>, target: Address) -> Result<(), BackendError> {
        match self.network.read().get(&target) {
            Some(handle) => self.deliver(&target, handle, payload),
            None => trace!(to = %target, "No route to validator"),
        }
        Ok(())
    }

    fn broadcast(&self, payload: Vec<u8>) -> Result<(), BackendError> {
        let network = self.network.read();
        if network.is_empty() {
            return Err(BackendError::Transport("no validators reachable".to_string()));
        }
        for (target, handle) in network.iter() {
            self.deliver(target, handle, payload.clone());
        }
        Ok(())
    }

    fn verify(&self, proposal: &Proposal) -> Result<(), BackendError> {
        let expected = self.hash(&Proposal::content_bytes(proposal.number, &proposal.payload));
        if proposal.digest != expected {
            return Err(BackendError::InvalidProposal(format!(
                "digest mismatch for sequence {}",
                proposal.number
            )));
        }
        Ok(())
    }

    fn commit(&self, proposal: &Proposal) -> Result<(), BackendError> {
        debug!(
            sequence = proposal.number,
            digest = %bs58::encode(&proposal.digest).into_string(),
            "Applied proposal"
        );
        self.ledger.lock().push(proposal.clone());
        Ok(())
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, BackendError> {
        let signature = self.signing_key.sign(data);
        let mut out = Vec::with_capacity(SIGNATURE_BYTES);
        out.extend_from_slice(self.signing_key.verifying_key().as_bytes());
        out.extend_from_slice(&signature.to_bytes());
        Ok(out)
    }

    fn check_signature(
        &self,
        data: &[u8],
        address: &Address,
        signature: &[u8],
    ) -> Result<(), BackendError> {
        let signer = self.check_validator_signature(data, signature)?;
        if signer != *address {
            return Err(BackendError::Signature(format!(
                "signed by {}, expected {}",
                signer, address
            )));
        }
        Ok(())
    }

    fn check_validator_signature(
        &self,
        data: &[u8],
        signature: &[u8],
    ) -> Result<Address, BackendError> {
        let (key, signature) = split_signature(signature)?;
        key.verify_strict(data, &signature)
            .map_err(|e| BackendError::Signature(e.to_string()))?;
        Ok(address_of(&key))
    }

    fn post(&self, event: ConsensusEvent) {
        self.bus.post(event);
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        match &self.storage {
            RoundStorage::Disk(store) => store
                .put(key, value)
                .map_err(|e| BackendError::Storage(e.to_string())),
            RoundStorage::Memory(map) => {
                map.lock().insert(key.to_string(), value.to_vec());
                Ok(())
            }
        }
    }

    fn restore(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        match &self.storage {
            RoundStorage::Disk(store) => store
                .get(key)
                .map_err(|e| BackendError::Storage(e.to_string())),
            RoundStorage::Memory(map) => Ok(map.lock().get(key).cloned()),
        }
    }
}
