//! Per-round vote collection

use std::collections::BTreeMap;

use crate::types::{Address, Preprepare, Proposal, Subject, View};

/// Votes for one phase, at most one per validator.
///
/// A repeated vote from the same address overwrites the earlier one, so the
/// size counts distinct senders.
#[derive(Debug, Clone, Default)]
pub struct VoteSet {
    votes: BTreeMap<Address, Subject>,
}

impl VoteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vote. Returns true if this is the sender's first vote.
    pub fn add(&mut self, address: Address, subject: Subject) -> bool {
        self.votes.insert(address, subject).is_none()
    }

    pub fn get(&self, address: &Address) -> Option<&Subject> {
        self.votes.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.votes.contains_key(address)
    }

    pub fn size(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.votes.keys()
    }
}

/// State of one round: the accepted preprepare and the votes gathered on it
#[derive(Debug, Clone)]
pub struct Snapshot {
    preprepare: Preprepare,
    pub prepares: VoteSet,
    pub commits: VoteSet,
}

impl Snapshot {
    pub fn new(preprepare: Preprepare) -> Self {
        Self {
            preprepare,
            prepares: VoteSet::new(),
            commits: VoteSet::new(),
        }
    }

    pub fn preprepare(&self) -> &Preprepare {
        &self.preprepare
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        self.preprepare.proposal.as_ref()
    }

    pub fn view(&self) -> View {
        self.preprepare.view
    }
}
