//! View change: abandon a stalled round and rotate the proposer
//!
//! A node that times out votes for view `v+1`. Each sender holds one vote,
//! its highest target, which also supports every lower view. F+1 votes for a
//! higher view pull a node along (at least one honest node has timed out); a
//! quorum completes the change.

use tracing::{debug, info, warn};

use super::{Core, State};
use crate::backend::Backend;
use crate::error::ConsensusError;
use crate::events::ConsensusEvent;
use crate::types::{Message, Subject, View, ViewChange};
use crate::validator::Validator;

/// A sender's latest view-change vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ViewVote {
    pub target: u64,
    /// Sender's last committed sequence
    pub committed: u64,
}

impl<B: Backend> Core<B> {
    /// Vote to leave the current view. Called by the round timer.
    pub fn start_view_change(&mut self) {
        let base = self.pending_view.unwrap_or(self.round.view_number);
        let target = base.max(self.round.view_number).saturating_add(1);
        info!(
            view = self.round.view_number,
            target,
            state = %self.state,
            "Starting view change"
        );
        self.send_view_change(target);
    }

    fn send_view_change(&mut self, target: u64) {
        self.pending_view = Some(target);
        self.broadcast(&Message::ViewChange(ViewChange {
            view: View::new(target, self.round.last_committed),
        }));
    }

    pub fn handle_view_change(&mut self, vote: &ViewChange, src: &Validator) -> Result<(), ConsensusError> {
        debug!(from = %src.address(), state = %self.state, "handle view change");

        let Some(committed) = vote.view.sequence else {
            warn!(from = %src.address(), "View change without committed sequence");
            return Err(ConsensusError::InvalidMessage);
        };
        let target = vote.view.view_number;
        if target <= self.round.view_number {
            return Err(ConsensusError::OldMessage);
        }

        // One vote per sender; a lower target than it already asked for is stale
        if let Some(previous) = self.view_changes.get(&src.address()) {
            if previous.target > target {
                return Err(ConsensusError::OldMessage);
            }
        }
        self.view_changes
            .insert(src.address(), ViewVote { target, committed });

        let support = self.view_support(target);
        if support > self.f && self.pending_view.map_or(true, |pending| pending < target) {
            debug!(target, votes = support, "joining view change");
            self.send_view_change(target);
        }

        if let Some(view_number) = self.quorum_view() {
            let committed = self.vouched_commit(view_number);
            self.change_view(view_number, committed);
        }

        Ok(())
    }

    /// Senders willing to leave for `target` or beyond
    fn view_support(&self, target: u64) -> usize {
        self.view_changes
            .values()
            .filter(|vote| vote.target >= target)
            .count()
    }

    /// Highest view a quorum is willing to move to, if it is ahead of ours
    fn quorum_view(&self) -> Option<u64> {
        let mut targets: Vec<u64> = self.view_changes.values().map(|vote| vote.target).collect();
        targets.sort_unstable_by(|a, b| b.cmp(a));
        targets
            .get(self.quorum().checked_sub(1)?)
            .copied()
            .filter(|&target| target > self.round.view_number)
    }

    /// Highest committed sequence reported by at least F+1 of the voters for
    /// `view_number`, so at least one honest validator vouches for it.
    fn vouched_commit(&self, view_number: u64) -> u64 {
        let mut reported: Vec<u64> = self
            .view_changes
            .values()
            .filter(|vote| vote.target >= view_number)
            .map(|vote| vote.committed)
            .collect();
        reported.sort_unstable_by(|a, b| b.cmp(a));
        reported
            .get(self.f)
            .or(reported.last())
            .copied()
            .unwrap_or(self.round.last_committed)
    }

    fn change_view(&mut self, view_number: u64, committed: u64) {
        if committed > self.round.last_committed {
            warn!(
                local = self.round.last_committed,
                vouched = committed,
                "Validators committed sequences this node has not seen"
            );
        }
        self.round.advance_view(view_number, committed);
        if self.pending_view.is_some_and(|pending| pending <= view_number) {
            self.pending_view = None;
        }
        self.view_changes.retain(|_, vote| vote.target > view_number);

        self.subject = Subject::new(self.round.current(), Vec::new());
        self.current = None;
        self.set_state(State::AcceptRequest);
        self.persist_round();

        let view = self.next_round();
        info!(view = %view, "View changed");
        self.backend.post(ConsensusEvent::ViewChanged { view });
        self.backend.post(ConsensusEvent::RoundStarted { view });
    }
}
