//! Prepare phase

use tracing::debug;

use super::{Core, State};
use crate::backend::Backend;
use crate::error::ConsensusError;
use crate::types::{Message, MessageCode, Subject};
use crate::validator::Validator;

impl<B: Backend> Core<B> {
    pub(crate) fn send_prepare(&self) {
        debug!(subject = %self.subject, "send prepare");
        self.broadcast(&Message::Prepare(self.subject.clone()));
    }

    pub fn handle_prepare(&mut self, subject: &Subject, src: &Validator) -> Result<(), ConsensusError> {
        debug!(from = %src.address(), state = %self.state, "handle prepare");

        self.verify_prepare(subject, src)?;

        let quorum = self.quorum();
        let prepares = match self.current.as_mut() {
            Some(snapshot) => {
                snapshot.prepares.add(src.address(), subject.clone());
                snapshot.prepares.size()
            }
            // Round already finished; the vote is late but valid
            None => return Ok(()),
        };

        // Only the first quorum in Preprepared sends a commit
        if self.state == State::Preprepared && prepares >= quorum {
            self.set_state(State::Prepared);
            self.send_commit();
        }

        Ok(())
    }

    pub(crate) fn verify_prepare(&self, subject: &Subject, src: &Validator) -> Result<(), ConsensusError> {
        self.verify_subject(MessageCode::Prepare, subject, src)
    }
}
