//! Local cluster - N validators in one process over in-memory channels

use std::time::Duration;

use anyhow::{bail, Context, Result};
use ed25519_dalek::SigningKey;
use pbft_consensus::{
    Address, ConsensusEvent, Core, EngineBuilder, EngineHandle, EventBus, Proposal, Request,
    ValidatorSet,
};
use rand::rngs::OsRng;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::backend::{address_of, LocalBackend, Network, RoundStorage};
use crate::config::NodeConfig;
use crate::store::RoundStore;

const KEY_CONTEXT: &str = "pbft-node 2024 validator signing key";

/// Validator keys, derived from `seed` when given so restarts keep addresses
pub fn validator_keys(count: usize, seed: Option<&str>) -> Vec<SigningKey> {
    (0..count)
        .map(|index| match seed {
            Some(seed) => {
                let material = format!("{}/{}", seed, index);
                SigningKey::from_bytes(&blake3::derive_key(KEY_CONTEXT, material.as_bytes()))
            }
            None => SigningKey::generate(&mut OsRng),
        })
        .collect()
}

struct Node {
    index: usize,
    address: Address,
    handle: EngineHandle,
    events: broadcast::Receiver<ConsensusEvent>,
    task: JoinHandle<Result<Core<LocalBackend>>>,
}

/// Running validators and their event streams
pub struct LocalCluster {
    nodes: Vec<Node>,
    validators: ValidatorSet,
    /// Lowest committed sequence restored at start
    height: u64,
}

impl LocalCluster {
    /// Build and spawn an engine for every online validator
    pub fn start(config: &NodeConfig) -> Result<Self> {
        config.validate()?;

        let keys = validator_keys(config.validators, config.key_seed.as_deref());
        let validators =
            ValidatorSet::new(keys.iter().map(|key| address_of(&key.verifying_key())));
        let network = Network::default();

        let mut engines = Vec::new();
        let mut height = u64::MAX;
        for (index, key) in keys.into_iter().enumerate() {
            let address = address_of(&key.verifying_key());
            if config.is_offline(index) {
                info!(index, %address, "Validator offline");
                continue;
            }

            let storage = match &config.data_dir {
                Some(dir) => {
                    let path = dir.join(format!("validator-{}", index));
                    std::fs::create_dir_all(&path)?;
                    RoundStorage::Disk(RoundStore::open(&path)?)
                }
                None => RoundStorage::memory(),
            };
            let bus = EventBus::new(config.consensus.event_capacity);
            let events = bus.subscribe();
            let backend = LocalBackend::new(key, validators.clone(), network.clone(), storage, bus);

            let (engine, handle) = EngineBuilder::new(backend)
                .config(config.consensus.clone())
                .build()
                .with_context(|| format!("Failed to start validator {}", index))?;
            let restored = engine.core().round_state();
            if restored.last_committed > 0 {
                info!(
                    index,
                    view = restored.view_number,
                    sequence = restored.last_committed,
                    "Restored round state"
                );
            }
            height = height.min(restored.last_committed);

            network.write().insert(address, handle.clone());
            engines.push((index, address, handle, events, engine));
        }

        // Spawn only once every route exists
        let nodes = engines
            .into_iter()
            .map(|(index, address, handle, events, engine)| Node {
                index,
                address,
                handle,
                events,
                task: engine.spawn(),
            })
            .collect();

        Ok(Self {
            nodes,
            validators,
            height: if height == u64::MAX { 0 } else { height },
        })
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// Submit a client request to every running validator
    pub async fn submit(&self, payload: Vec<u8>) -> Result<()> {
        for node in &self.nodes {
            node.handle
                .submit(Request::new(payload.clone()))
                .await
                .with_context(|| format!("Validator {} is not running", node.index))?;
        }
        Ok(())
    }

    /// Wait until every running validator has committed `sequence`
    pub async fn wait_for_height(&mut self, sequence: u64, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        for node in self.nodes.iter_mut() {
            let index = node.index;
            let reached = tokio::time::timeout_at(deadline, async {
                loop {
                    match node.events.recv().await {
                        Ok(ConsensusEvent::FinalCommitted { sequence: s, .. }) if s >= sequence => {
                            return Ok(());
                        }
                        Ok(ConsensusEvent::ViewChanged { view }) => {
                            info!(index, %view, "View changed");
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(missed)) => {
                            warn!(index, missed, "Event stream lagged");
                        }
                        Err(RecvError::Closed) => bail!("Validator {} stopped", index),
                    }
                }
            })
            .await;
            match reached {
                Ok(result) => result?,
                Err(_) => bail!(
                    "Validator {} did not commit sequence {} within {:?}",
                    index,
                    sequence,
                    timeout
                ),
            }
        }
        Ok(())
    }

    /// Stop every engine and collect what each committed
    pub async fn shutdown(self) -> Result<ClusterReport> {
        for node in &self.nodes {
            node.handle.shutdown().await;
        }

        let mut nodes = Vec::with_capacity(self.nodes.len());
        for node in self.nodes {
            let core = node.task.await??;
            let round = core.round_state();
            nodes.push(NodeReport {
                index: node.index,
                address: node.address,
                view_number: round.view_number,
                last_committed: round.last_committed,
                ledger: core.backend().ledger(),
            });
        }
        Ok(ClusterReport { nodes })
    }
}

#[derive(Debug, Clone)]
pub struct NodeReport {
    pub index: usize,
    pub address: Address,
    pub view_number: u64,
    pub last_committed: u64,
    /// Proposals committed during this run
    pub ledger: Vec<Proposal>,
}

#[derive(Debug, Clone)]
pub struct ClusterReport {
    pub nodes: Vec<NodeReport>,
}

impl ClusterReport {
    /// Every pair of ledgers must agree on each sequence both committed
    pub fn check_agreement(&self) -> Result<()> {
        for (i, a) in self.nodes.iter().enumerate() {
            for b in &self.nodes[i + 1..] {
                for left in &a.ledger {
                    let Some(right) = b.ledger.iter().find(|p| p.number == left.number) else {
                        continue;
                    };
                    if left.digest != right.digest {
                        bail!(
                            "Validators {} and {} diverge at sequence {}",
                            a.index,
                            b.index,
                            left.number
                        );
                    }
                }
            }
        }
        Ok(())
    }

    pub fn log(&self) {
        for node in &self.nodes {
            info!(
                index = node.index,
                address = %node.address,
                view = node.view_number,
                sequence = node.last_committed,
                committed = node.ledger.len(),
                "Validator summary"
            );
        }
    }
}
