//! Preprepare phase: proposal creation and acceptance

use tracing::{debug, warn};

use super::{Core, State};
use crate::backend::Backend;
use crate::error::ConsensusError;
use crate::snapshot::Snapshot;
use crate::types::{Message, MessageCode, Preprepare, Proposal, Request, Subject};
use crate::validator::Validator;

impl<B: Backend> Core<B> {
    /// Propose `request` for the next round. Only the designated proposer
    /// broadcasts; returns whether a preprepare was sent.
    pub fn send_preprepare(&self, request: &Request) -> bool {
        if !self.is_proposer() {
            return false;
        }

        let view = self.next_round();
        let Some(sequence) = view.sequence else {
            return false;
        };
        debug!(state = %self.state, view = %view, "send preprepare");

        self.broadcast(&Message::Preprepare(Preprepare {
            view,
            proposal: Some(self.make_proposal(sequence, request)),
        }));
        true
    }

    fn make_proposal(&self, sequence: u64, request: &Request) -> Proposal {
        let digest = self
            .backend
            .hash(&Proposal::content_bytes(sequence, &request.payload));
        Proposal::new(sequence, request.payload.clone(), digest)
    }

    pub fn handle_preprepare(&mut self, message: &Message, src: &Validator) -> Result<(), ConsensusError> {
        debug!(from = %src.address(), state = %self.state, "handle preprepare");

        let preprepare = match message {
            Message::Preprepare(preprepare) => preprepare,
            other => {
                return Err(ConsensusError::Decode(format!(
                    "expected preprepare, got {}",
                    other.code()
                )))
            }
        };

        if self.is_future_message(MessageCode::Preprepare, &preprepare.view) {
            return Err(ConsensusError::FutureMessage);
        }

        if !self.validators().is_proposer(&src.address(), &preprepare.view) {
            warn!(from = %src.address(), view = %preprepare.view, "Ignore preprepare from non-proposer");
            return Err(ConsensusError::NotFromProposer);
        }

        if let Some(proposal) = &preprepare.proposal {
            if let Err(e) = self.backend.verify(proposal) {
                warn!(from = %src.address(), "Verify proposal failed: {}", e);
                return Err(e.into());
            }
        }

        let expected = self.next_round();
        if preprepare.view != expected {
            warn!(expected = %expected, got = %preprepare.view, "Preprepare does not match");
            return Err(ConsensusError::InvalidMessage);
        }

        let Some(proposal) = &preprepare.proposal else {
            warn!(from = %src.address(), "Proposal is nil");
            return Err(ConsensusError::NilProposal);
        };

        if Some(proposal.number) != expected.sequence {
            warn!(
                from = %src.address(),
                expected = %expected,
                number = proposal.number,
                "Proposal number does not match its round"
            );
            return Err(ConsensusError::InvalidMessage);
        }

        if self.state == State::AcceptRequest {
            let subject = Subject::new(preprepare.view, proposal.digest.clone());
            self.accept_preprepare(preprepare.clone(), subject);
            self.set_state(State::Preprepared);
            self.send_prepare();
        }

        Ok(())
    }

    fn accept_preprepare(&mut self, preprepare: Preprepare, subject: Subject) {
        self.subject = subject;
        self.current = Some(Snapshot::new(preprepare));
    }
}
