//! PBFT Validator
//!
//! Starts a local validator cluster, feeds it client requests and waits for
//! every running validator to commit them.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use pbft_validator::{LocalCluster, NodeConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Local PBFT validator cluster
#[derive(Parser, Debug)]
#[command(name = "pbft-node")]
#[command(about = "Three-phase PBFT consensus over a local validator set", long_about = None)]
struct Args {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of validators
    #[arg(long)]
    validators: Option<usize>,

    /// Validator indices to leave offline (comma separated)
    #[arg(long, value_delimiter = ',')]
    offline: Option<Vec<usize>>,

    /// Number of client requests to submit
    #[arg(long)]
    requests: Option<u64>,

    /// Delay between requests in milliseconds
    #[arg(long)]
    request_interval_ms: Option<u64>,

    /// Round timeout before a view change, in milliseconds
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Data directory for persistent round state
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seed for deterministic validator keys
    #[arg(long)]
    key_seed: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        if let Some(validators) = self.validators {
            config.validators = validators;
        }
        if let Some(offline) = self.offline {
            config.offline = offline;
        }
        if let Some(requests) = self.requests {
            config.requests = requests;
        }
        if let Some(interval) = self.request_interval_ms {
            config.request_interval_ms = interval;
        }
        if let Some(timeout) = self.request_timeout_ms {
            config.consensus.request_timeout_ms = timeout;
        }
        if self.data_dir.is_some() {
            config.data_dir = self.data_dir;
        }
        if self.key_seed.is_some() {
            config.key_seed = self.key_seed;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    run(config).await
}

async fn run(config: NodeConfig) -> Result<()> {
    tracing::info!("Starting PBFT validator cluster");
    tracing::info!("  Validators: {} ({} offline)", config.validators, config.offline.len());
    tracing::info!("  Requests: {} every {}ms", config.requests, config.request_interval_ms);
    tracing::info!("  Round timeout: {}ms", config.consensus.request_timeout_ms);
    if let Some(dir) = &config.data_dir {
        tracing::info!("  Data directory: {:?}", dir);
    }

    let mut cluster = LocalCluster::start(&config)?;
    let start = cluster.height();
    let target = start + config.requests;
    let interval = Duration::from_millis(config.request_interval_ms);
    let timeout = Duration::from_millis(config.run_timeout_ms);

    let driver = async {
        for sequence in start + 1..=target {
            cluster
                .submit(format!("request-{}", sequence).into_bytes())
                .await?;
            tokio::time::sleep(interval).await;
        }
        cluster.wait_for_height(target, timeout).await
    };

    let outcome = tokio::select! {
        result = driver => {
            if result.is_ok() {
                tracing::info!("All validators committed sequence {}", target);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            Ok(())
        }
    };

    // Report what was committed even when the run failed
    let report = cluster.shutdown().await?;
    report.log();
    report.check_agreement()?;

    tracing::info!("Cluster stopped");

    outcome
}
