//! Validator set - ordered membership, quorum size and proposer selection

use serde::{Deserialize, Serialize};

use crate::round;
use crate::types::{Address, View};

/// A single consensus participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Validator {
    address: Address,
}

impl Validator {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

/// Fixed, ordered set of validators.
///
/// Index order is the order addresses were supplied in; every node must build
/// the set from the same list so proposer selection agrees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
}

impl ValidatorSet {
    /// Build a set, keeping the first occurrence of any repeated address
    pub fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
        let mut validators: Vec<Validator> = Vec::new();
        for address in addresses {
            if validators.iter().any(|v| v.address == address) {
                tracing::warn!("Ignoring duplicate validator {}", address);
                continue;
            }
            validators.push(Validator::new(address));
        }
        Self { validators }
    }

    pub fn size(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn list(&self) -> &[Validator] {
        &self.validators
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    pub fn get_by_address(&self, address: &Address) -> Option<&Validator> {
        self.validators.iter().find(|v| v.address == *address)
    }

    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.validators.iter().position(|v| v.address == *address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.index_of(address).is_some()
    }

    /// Designated proposer for `view` (round-robin over the view number)
    pub fn proposer(&self, view: &View) -> Option<&Validator> {
        round::proposer_index(view.view_number, self.size()).and_then(|i| self.get_by_index(i))
    }

    pub fn is_proposer(&self, address: &Address, view: &View) -> bool {
        self.proposer(view).is_some_and(|p| p.address == *address)
    }

    /// F: faulty validators tolerated
    pub fn max_faulty(&self) -> usize {
        round::max_faulty(self.size())
    }

    /// Matching votes needed per phase; 2F+1 for a set of 3F+1
    pub fn quorum_size(&self) -> usize {
        round::quorum(self.size(), self.max_faulty())
    }
}
