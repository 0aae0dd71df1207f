//! Persistence Layer for round state
//!
//! Uses a sled embedded database so a validator resumes from its last
//! committed sequence after a restart. Every write is flushed.

use sled::Db;
use std::path::Path;

/// Sled-backed key/value store for consensus state
pub struct RoundStore {
    db: Db,
    /// Consensus tree
    rounds: sled::Tree,
}

impl RoundStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = sled::open(&path)?;
        let rounds = db.open_tree("rounds")?;

        tracing::info!("Opened round store at {:?}", path.as_ref());

        Ok(Self { db, rounds })
    }

    pub fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.rounds.insert(key.as_bytes(), value)?;
        self.rounds.flush()?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.rounds.get(key.as_bytes())?.map(|bytes| bytes.to_vec()))
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> anyhow::Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
