//! Scenario tests for the round state machine
//!
//! `TestBackend` records everything the core sends instead of delivering it,
//! so tests drive handlers directly or route the recorded bytes themselves.

mod commit_test;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::Backend;
use crate::engine::EngineHandle;
use crate::error::BackendError;
use crate::events::{ConsensusEvent, EventBus};
use crate::machine::Core;
use crate::snapshot::Snapshot;
use crate::types::{Address, Message, Preprepare, Proposal, SignedMessage, Subject};
use crate::validator::{Validator, ValidatorSet};

/// Peers reached by `broadcast` when a test wires engines together
pub(crate) type Router = Arc<Mutex<Vec<EngineHandle>>>;

pub(crate) struct TestBackend {
    address: Address,
    validators: ValidatorSet,
    /// Every message sent, in order
    sent: Mutex<Vec<Vec<u8>>>,
    /// Messages not yet routed by `run_until_quiet`
    outbox: Mutex<Vec<Vec<u8>>>,
    committed: Mutex<Vec<Proposal>>,
    events: Mutex<Vec<ConsensusEvent>>,
    store: Mutex<HashMap<String, Vec<u8>>>,
    verify_error: Mutex<Option<BackendError>>,
    fail_commit: AtomicBool,
    bus: EventBus,
    router: Option<Router>,
}

impl TestBackend {
    pub(crate) fn new(address: Address, validators: ValidatorSet) -> Self {
        Self {
            address,
            validators,
            sent: Mutex::new(Vec::new()),
            outbox: Mutex::new(Vec::new()),
            committed: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            store: Mutex::new(HashMap::new()),
            verify_error: Mutex::new(None),
            fail_commit: AtomicBool::new(false),
            bus: EventBus::new(64),
            router: None,
        }
    }

    pub(crate) fn with_router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub(crate) fn with_stored(self, key: &str, value: Vec<u8>) -> Self {
        self.store.lock().insert(key.to_string(), value);
        self
    }

    pub(crate) fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().iter().map(|bytes| open_unchecked(bytes)).collect()
    }

    pub(crate) fn take_outbox(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.outbox.lock())
    }

    pub(crate) fn committed(&self) -> Vec<Proposal> {
        self.committed.lock().clone()
    }

    pub(crate) fn events(&self) -> Vec<ConsensusEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn stored(&self, key: &str) -> Option<Vec<u8>> {
        self.store.lock().get(key).cloned()
    }

    pub(crate) fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub(crate) fn reject_proposals(&self, error: BackendError) {
        *self.verify_error.lock() = Some(error);
    }

    pub(crate) fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    fn record(&self, payload: Vec<u8>) {
        self.sent.lock().push(payload.clone());
        self.outbox.lock().push(payload.clone());
        if let Some(router) = &self.router {
            for peer in router.lock().iter() {
                let _ = peer.try_deliver(payload.clone());
            }
        }
    }
}

impl Backend for TestBackend {
    fn address(&self) -> Address {
        self.address
    }

    fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    fn send(&self, payload: Vec<u8>, _target: Address) -> Result<(), BackendError> {
        self.record(payload);
        Ok(())
    }

    fn broadcast(&self, payload: Vec<u8>) -> Result<(), BackendError> {
        self.record(payload);
        Ok(())
    }

    fn verify(&self, _proposal: &Proposal) -> Result<(), BackendError> {
        match self.verify_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn commit(&self, proposal: &Proposal) -> Result<(), BackendError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(BackendError::Commit("disk full".to_string()));
        }
        self.committed.lock().push(proposal.clone());
        Ok(())
    }

    // The signature is the signer's address
    fn sign(&self, _data: &[u8]) -> Result<Vec<u8>, BackendError> {
        Ok(self.address.as_bytes().to_vec())
    }

    fn check_signature(
        &self,
        _data: &[u8],
        address: &Address,
        signature: &[u8],
    ) -> Result<(), BackendError> {
        if signature == address.as_bytes() {
            Ok(())
        } else {
            Err(BackendError::Signature("signer mismatch".to_string()))
        }
    }

    fn check_validator_signature(
        &self,
        _data: &[u8],
        signature: &[u8],
    ) -> Result<Address, BackendError> {
        let bytes: [u8; 32] = signature
            .try_into()
            .map_err(|_| BackendError::Signature("bad length".to_string()))?;
        Ok(Address::new(bytes))
    }

    fn post(&self, event: ConsensusEvent) {
        self.events.lock().push(event.clone());
        self.bus.post(event);
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        self.store.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn restore(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.store.lock().get(key).cloned())
    }
}

pub(crate) fn test_address(index: usize) -> Address {
    Address::new([index as u8 + 1; 32])
}

pub(crate) fn test_validator_set(n: usize) -> ValidatorSet {
    ValidatorSet::new((0..n).map(test_address))
}

/// One core per validator, all over the same set, with N and F fixed
pub(crate) fn new_test_system(n: usize, f: usize) -> Vec<Core<TestBackend>> {
    let validators = test_validator_set(n);
    (0..n)
        .map(|i| {
            let backend = TestBackend::new(test_address(i), validators.clone());
            let mut core = Core::new(backend).unwrap();
            core.n = n;
            core.f = f;
            core
        })
        .collect()
}

/// Put a core into the middle of a round on `subject`
pub(crate) fn seed_round(core: &mut Core<TestBackend>, subject: &Subject) {
    let number = subject.view.sequence.unwrap_or_default();
    core.subject = subject.clone();
    core.current = Some(Snapshot::new(Preprepare {
        view: subject.view,
        proposal: Some(Proposal::new(number, b"payload".to_vec(), subject.digest.clone())),
    }));
}

/// Sign a message the way `TestBackend` does, as `signer`
pub(crate) fn seal(message: &Message, signer: Address) -> Vec<u8> {
    SignedMessage {
        payload: message.to_bytes().unwrap(),
        signature: signer.as_bytes().to_vec(),
    }
    .to_bytes()
    .unwrap()
}

pub(crate) fn open_unchecked(bytes: &[u8]) -> Message {
    let signed = SignedMessage::from_bytes(bytes).unwrap();
    Message::from_bytes(&signed.payload).unwrap()
}

pub(crate) fn validator(index: usize) -> Validator {
    Validator::new(test_address(index))
}

/// Deliver every recorded message to every core until nothing new is sent
pub(crate) fn run_until_quiet(system: &mut [Core<TestBackend>]) {
    for _ in 0..64 {
        let outbox: Vec<Vec<u8>> = system
            .iter()
            .flat_map(|core| core.backend().take_outbox())
            .collect();
        if outbox.is_empty() {
            return;
        }
        for bytes in &outbox {
            for core in system.iter_mut() {
                let _ = core.handle_bytes(bytes);
            }
        }
    }
    panic!("system did not quiesce");
}
