//! Round and view arithmetic

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::types::{MessageCode, View};

/// Faulty validators tolerated by a set of `n`: largest F with n >= 3F+1
pub fn max_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// Votes needed to agree on a phase in a set of `n` tolerating `f`.
///
/// 2F+1 when n = 3F+1. Larger sets need n - F so any two quorums share an
/// honest validator.
pub fn quorum(n: usize, f: usize) -> usize {
    (2 * f + 1).max(n.saturating_sub(f))
}

/// Index of the proposer for `view_number` in a set of `n`
pub fn proposer_index(view_number: u64, n: usize) -> Option<usize> {
    if n == 0 {
        return None;
    }
    Some((view_number % n as u64) as usize)
}

/// Whether `view` lies ahead of where the local node expects messages of
/// kind `code`.
///
/// Preprepares are measured against the next round to be proposed; votes
/// against the view of the current subject.
pub fn is_future(code: MessageCode, view: &View, next_round: &View, current: &View) -> bool {
    match code {
        MessageCode::Preprepare => view.cmp(next_round) == Ordering::Greater,
        MessageCode::Prepare | MessageCode::Commit => view.cmp(current) == Ordering::Greater,
        MessageCode::ViewChange => false,
    }
}

/// Persisted position of a node: current view plus last committed sequence
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize,
    Deserialize,
)]
pub struct RoundState {
    pub view_number: u64,
    pub last_committed: u64,
}

impl RoundState {
    /// The (view, sequence) pair the next proposal must carry
    pub fn next_round(&self) -> View {
        View::new(self.view_number, self.last_committed.saturating_add(1))
    }

    /// Position of the last finished round
    pub fn current(&self) -> View {
        View::new(self.view_number, self.last_committed)
    }

    /// Record a committed sequence, view number unchanged
    pub fn commit(&mut self, sequence: u64) {
        self.last_committed = self.last_committed.max(sequence);
    }

    /// Move to `view_number`, rebasing the sequence on a committed sequence
    /// the view-change quorum vouches for.
    pub fn advance_view(&mut self, view_number: u64, highest_committed: u64) {
        self.view_number = self.view_number.max(view_number);
        self.last_committed = self.last_committed.max(highest_committed);
    }
}
