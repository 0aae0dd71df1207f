//! PBFT Consensus - three-phase agreement over a fixed validator set
//!
//! Architecture:
//! - `Core` is the per-validator round state machine (preprepare, prepare, commit)
//! - `Backend` supplies transport, signing, proposal checks and persistence
//! - `Engine` feeds one core from a single-consumer inbox, defers future
//!   messages and triggers view changes when a round stalls
//!
//! Tolerates F faulty validators out of N >= 3F+1; every phase needs 2F+1 votes.

pub mod backend;
pub mod backlog;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod machine;
pub mod round;
pub mod snapshot;
pub mod types;
pub mod validator;

#[cfg(test)]
mod tests;

pub use backend::Backend;
pub use backlog::Backlog;
pub use config::ConsensusConfig;
pub use engine::{Engine, EngineBuilder, EngineHandle};
pub use error::{BackendError, ConsensusError};
pub use events::{ConsensusEvent, EventBus};
pub use machine::{Core, State, ROUND_STATE_KEY};
pub use round::RoundState;
pub use snapshot::{Snapshot, VoteSet};
pub use types::*;
pub use validator::{Validator, ValidatorSet};
