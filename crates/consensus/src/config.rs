//! Consensus engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one consensus engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// How long a round may stall before a view change is started
    pub request_timeout_ms: u64,
    /// Future messages held for replay
    pub backlog_capacity: usize,
    /// Buffered events per subscriber
    pub event_capacity: usize,
    /// Queued inbound messages and requests
    pub inbox_capacity: usize,
}

impl ConsensusConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            backlog_capacity: 1024,
            event_capacity: 256,
            inbox_capacity: 1024,
        }
    }
}
