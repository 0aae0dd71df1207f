//! Node configuration

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use pbft_consensus::{round, ConsensusConfig};
use serde::{Deserialize, Serialize};

/// Local cluster configuration, loaded from JSON and overridden by CLI flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Size of the validator set
    pub validators: usize,
    /// Validator indices that are in the set but never started
    pub offline: Vec<usize>,
    /// Client requests to submit
    pub requests: u64,
    /// Delay between submitted requests
    pub request_interval_ms: u64,
    /// Give up waiting for commits after this long
    pub run_timeout_ms: u64,
    /// Round state is persisted under this directory when set
    pub data_dir: Option<PathBuf>,
    /// Derive validator keys from this seed instead of generating them
    pub key_seed: Option<String>,
    pub log_level: String,
    pub consensus: ConsensusConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            validators: 4,
            offline: Vec::new(),
            requests: 10,
            request_interval_ms: 100,
            run_timeout_ms: 60_000,
            data_dir: None,
            key_seed: None,
            log_level: "info".to_string(),
            consensus: ConsensusConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        Ok(config)
    }

    /// Reject clusters that could never commit
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.validators == 0 {
            bail!("At least one validator is required");
        }
        if let Some(index) = self.offline.iter().find(|&&i| i >= self.validators) {
            bail!(
                "Offline validator {} is outside a set of {}",
                index,
                self.validators
            );
        }
        let mut offline = self.offline.clone();
        offline.sort_unstable();
        offline.dedup();
        let faulty = round::max_faulty(self.validators);
        if offline.len() > faulty {
            bail!(
                "{} offline validators exceed the {} a set of {} tolerates",
                offline.len(),
                faulty,
                self.validators
            );
        }
        Ok(())
    }

    pub fn is_offline(&self, index: usize) -> bool {
        self.offline.contains(&index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"validators": 7, "offline": [2], "consensus": {{"request_timeout_ms": 500}}}}"#
        )
        .unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.validators, 7);
        assert!(config.is_offline(2));
        assert_eq!(config.requests, 10);
        assert_eq!(config.consensus.request_timeout_ms, 500);
        assert_eq!(config.consensus.backlog_capacity, 1024);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_unrecoverable_clusters() {
        let none = NodeConfig {
            validators: 0,
            ..Default::default()
        };
        assert!(none.validate().is_err());

        let out_of_range = NodeConfig {
            offline: vec![4],
            ..Default::default()
        };
        assert!(out_of_range.validate().is_err());

        // 4 validators tolerate one fault, not two
        let too_many = NodeConfig {
            offline: vec![0, 1],
            ..Default::default()
        };
        assert!(too_many.validate().is_err());

        let repeated = NodeConfig {
            offline: vec![1, 1],
            ..Default::default()
        };
        assert!(repeated.validate().is_ok());
    }
}
