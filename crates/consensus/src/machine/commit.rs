//! Commit phase and finalization

use tracing::{debug, info, warn};

use super::{Core, State};
use crate::backend::Backend;
use crate::error::ConsensusError;
use crate::events::ConsensusEvent;
use crate::types::{Message, MessageCode, Subject};
use crate::validator::Validator;

impl<B: Backend> Core<B> {
    pub(crate) fn send_commit(&self) {
        debug!(subject = %self.subject, "send commit");
        self.broadcast(&Message::Commit(self.subject.clone()));
    }

    pub fn handle_commit(&mut self, subject: &Subject, src: &Validator) -> Result<(), ConsensusError> {
        debug!(from = %src.address(), state = %self.state, "handle commit");

        self.verify_commit(subject, src)?;

        let quorum = self.quorum();
        let commits = match self.current.as_mut() {
            Some(snapshot) => {
                snapshot.commits.add(src.address(), subject.clone());
                snapshot.commits.size()
            }
            None => return Ok(()),
        };

        if self.state == State::Prepared && commits >= quorum {
            self.commit()?;
        }

        Ok(())
    }

    pub(crate) fn verify_commit(&self, subject: &Subject, src: &Validator) -> Result<(), ConsensusError> {
        self.verify_subject(MessageCode::Commit, subject, src)
    }

    /// Deliver the round's proposal and move to the next sequence. A backend
    /// failure leaves the round in Prepared so a later commit vote retries.
    fn commit(&mut self) -> Result<(), ConsensusError> {
        let Some(proposal) = self.current.as_ref().and_then(|s| s.proposal()).cloned() else {
            warn!(subject = %self.subject, "Commit quorum without a proposal");
            return Err(ConsensusError::NilProposal);
        };
        // The round advances by the agreed subject, never the proposal's own number
        let Some(sequence) = self.subject.view.sequence else {
            return Err(ConsensusError::InvalidMessage);
        };

        if let Err(e) = self.backend.commit(&proposal) {
            warn!(sequence, "Failed to commit proposal: {}", e);
            return Err(e.into());
        }
        self.set_state(State::Committed);

        info!(
            sequence,
            digest = %bs58::encode(&proposal.digest).into_string(),
            "Committed proposal"
        );
        self.round.commit(sequence);
        self.persist_round();
        self.backend.post(ConsensusEvent::FinalCommitted {
            sequence,
            digest: proposal.digest.clone(),
        });
        self.set_last_committed(proposal);

        self.start_new_round();
        Ok(())
    }
}
