//! PBFT validator node
//!
//! Runs a validator set inside one process: every validator gets its own
//! consensus engine, ed25519 identity and round store, and engines exchange
//! signed messages over in-memory channels.

pub mod backend;
pub mod cluster;
pub mod config;
pub mod store;

pub use backend::{LocalBackend, Network, RoundStorage};
pub use cluster::{ClusterReport, LocalCluster, NodeReport};
pub use config::NodeConfig;
pub use store::RoundStore;
