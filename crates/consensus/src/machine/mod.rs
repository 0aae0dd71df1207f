//! Round state machine
//!
//! One `Core` per validator. Handlers are invoked one at a time by a single
//! consumer; each either accepts the message and advances the round or
//! rejects it with a `ConsensusError`, leaving the state untouched.
//!
//! Flow per sequence:
//! - Proposer broadcasts a Preprepare for `next_round()`
//! - Every node accepts it, broadcasts a Prepare for the subject
//! - 2F+1 matching Prepares: broadcast one Commit
//! - 2F+1 matching Commits: hand the proposal to the backend, start the next round

mod commit;
mod prepare;
mod preprepare;
mod view_change;

pub(crate) use view_change::ViewVote;

use std::collections::BTreeMap;
use std::fmt;

use borsh::BorshDeserialize;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::ConsensusError;
use crate::events::ConsensusEvent;
use crate::round::{self, RoundState};
use crate::snapshot::Snapshot;
use crate::types::{Address, Message, MessageCode, Proposal, SignedMessage, Subject, View};
use crate::validator::{Validator, ValidatorSet};

/// Key the round position is persisted under
pub const ROUND_STATE_KEY: &str = "pbft/round";

/// Phase of the current round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AcceptRequest,
    Preprepared,
    Prepared,
    Committed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::AcceptRequest => "AcceptRequest",
            State::Preprepared => "Preprepared",
            State::Prepared => "Prepared",
            State::Committed => "Committed",
        };
        f.write_str(name)
    }
}

/// Per-validator PBFT state machine
pub struct Core<B: Backend> {
    pub(crate) backend: B,
    address: Address,
    validators: ValidatorSet,
    /// Validator count
    pub(crate) n: usize,
    /// Faulty validators tolerated
    pub(crate) f: usize,
    pub(crate) state: State,
    /// Subject of the round in flight, or of the last finished one
    pub(crate) subject: Subject,
    pub(crate) current: Option<Snapshot>,
    pub(crate) round: RoundState,
    /// Target view of a view change we have voted for
    pub(crate) pending_view: Option<u64>,
    /// Highest view-change vote per sender
    pub(crate) view_changes: BTreeMap<Address, ViewVote>,
    last_committed_proposal: Option<Proposal>,
}

impl<B: Backend> Core<B> {
    /// Create a core, restoring the persisted round position if the backend
    /// has one.
    pub fn new(backend: B) -> Result<Self, ConsensusError> {
        let address = backend.address();
        let validators = backend.validators().clone();
        let n = validators.size();
        let f = validators.max_faulty();

        let round = match backend.restore(ROUND_STATE_KEY)? {
            Some(bytes) => RoundState::try_from_slice(&bytes)
                .map_err(|e| ConsensusError::Persistence(e.to_string()))?,
            None => RoundState::default(),
        };
        if !validators.contains(&address) {
            warn!("Local address {} is not in the validator set", address);
        }

        Ok(Self {
            backend,
            address,
            validators,
            n,
            f,
            state: State::AcceptRequest,
            subject: Subject::new(round.current(), Vec::new()),
            current: None,
            round,
            pending_view: None,
            view_changes: BTreeMap::new(),
            last_committed_proposal: None,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.current.as_ref()
    }

    pub fn round_state(&self) -> RoundState {
        self.round
    }

    pub fn pending_view(&self) -> Option<u64> {
        self.pending_view
    }

    /// Proposal finalized by the most recent commit
    pub fn last_committed(&self) -> Option<&Proposal> {
        self.last_committed_proposal.as_ref()
    }

    /// Matching votes needed per phase
    pub fn quorum(&self) -> usize {
        round::quorum(self.n, self.f)
    }

    pub fn max_faulty(&self) -> usize {
        self.f
    }

    /// The (view, sequence) the next proposal must carry
    pub fn next_round(&self) -> View {
        self.round.next_round()
    }

    /// Whether this node proposes the next round
    pub fn is_proposer(&self) -> bool {
        self.backend.is_proposer(&self.next_round())
    }

    /// Authenticate and decode raw bytes from the transport
    pub fn open(&self, data: &[u8]) -> Result<(Message, Validator), ConsensusError> {
        let signed = SignedMessage::from_bytes(data)?;
        let address = self
            .backend
            .check_validator_signature(&signed.payload, &signed.signature)
            .map_err(|e| {
                debug!("Rejecting message with bad signature: {}", e);
                ConsensusError::InvalidSignature
            })?;
        let validator = *self
            .validators
            .get_by_address(&address)
            .ok_or(ConsensusError::UnknownValidator(address))?;
        let message = self.backend.decode(&signed.payload)?;
        Ok((message, validator))
    }

    /// Authenticate, decode and handle raw bytes from the transport
    pub fn handle_bytes(&mut self, data: &[u8]) -> Result<(), ConsensusError> {
        let (message, src) = self.open(data)?;
        self.handle_message(&message, &src)
    }

    /// Dispatch a decoded message to its handler
    pub fn handle_message(&mut self, message: &Message, src: &Validator) -> Result<(), ConsensusError> {
        match message {
            Message::Preprepare(_) => self.handle_preprepare(message, src),
            Message::Prepare(subject) => self.handle_prepare(subject, src),
            Message::Commit(subject) => self.handle_commit(subject, src),
            Message::ViewChange(vote) => self.handle_view_change(vote, src),
        }
    }

    pub(crate) fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "state transition");
            self.state = state;
        }
    }

    pub(crate) fn is_future_message(&self, code: MessageCode, view: &View) -> bool {
        round::is_future(code, view, &self.next_round(), &self.subject.view)
    }

    /// Shared validation for Prepare and Commit votes
    pub(crate) fn verify_subject(
        &self,
        code: MessageCode,
        subject: &Subject,
        src: &Validator,
    ) -> Result<(), ConsensusError> {
        if !subject.view.is_complete() {
            warn!(from = %src.address(), "Malformed {} subject without sequence", code);
            return Err(ConsensusError::SubjectNotMatched);
        }
        if self.is_future_message(code, &subject.view) {
            return Err(ConsensusError::FutureMessage);
        }
        if subject.view < self.subject.view {
            return Err(ConsensusError::OldMessage);
        }
        if *subject != self.subject {
            warn!(
                from = %src.address(),
                expected = %self.subject,
                got = %subject,
                "Inconsistent {} subject",
                code
            );
            return Err(ConsensusError::SubjectNotMatched);
        }
        Ok(())
    }

    /// Sign and broadcast a message. Transport failures are logged; the
    /// round carries on and relies on other validators' votes.
    pub(crate) fn broadcast(&self, message: &Message) {
        match self.seal(message) {
            Ok(bytes) => {
                if let Err(e) = self.backend.broadcast(bytes) {
                    warn!("Failed to broadcast {}: {}", message.code(), e);
                }
            }
            Err(e) => warn!("Failed to seal {}: {}", message.code(), e),
        }
    }

    fn seal(&self, message: &Message) -> Result<Vec<u8>, ConsensusError> {
        let payload = self.backend.encode(message)?;
        let signature = self.backend.sign(&payload)?;
        SignedMessage { payload, signature }.to_bytes()
    }

    /// Reset to AcceptRequest for the next sequence
    pub(crate) fn start_new_round(&mut self) {
        self.current = None;
        self.set_state(State::AcceptRequest);
        let view = self.next_round();
        debug!(view = %view, "round started");
        self.backend.post(ConsensusEvent::RoundStarted { view });
    }

    pub(crate) fn persist_round(&self) {
        let bytes = match borsh::to_vec(&self.round) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode round state: {}", e);
                return;
            }
        };
        if let Err(e) = self.backend.save(ROUND_STATE_KEY, &bytes) {
            warn!("Failed to persist round state: {}", e);
        }
    }

    pub(crate) fn set_last_committed(&mut self, proposal: Proposal) {
        self.last_committed_proposal = Some(proposal);
    }
}
