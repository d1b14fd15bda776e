//! Ledger configuration.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::constants::{
    MAX_TRANSACTIONS_PER_BLOCK, MINING_TIMEOUT_MS, POW_TARGET_DIFFICULTY, SYSTEM_ACCOUNT,
};
use crate::error::{LedgerError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Leading zero hex digits required of every block hash.
    pub difficulty: u32,
    /// Upper bound on transactions sealed into one block.
    pub max_transactions_per_block: usize,
    /// `None` searches without a deadline.
    pub mining_timeout_ms: Option<u64>,
    pub parallel_mining: bool,
    /// Also check block 0 on its own when validating a ledger.
    pub validate_genesis: bool,
    pub genesis_miner: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: POW_TARGET_DIFFICULTY,
            max_transactions_per_block: MAX_TRANSACTIONS_PER_BLOCK,
            mining_timeout_ms: Some(MINING_TIMEOUT_MS),
            parallel_mining: false,
            validate_genesis: false,
            genesis_miner: SYSTEM_ACCOUNT.to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.check()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn check(self) -> Result<Self> {
        if self.difficulty as usize > crate::constants::HASH_HEX_SIZE {
            return Err(LedgerError::Config(format!(
                "difficulty {} exceeds hash length",
                self.difficulty
            )));
        }
        if self.max_transactions_per_block == 0 {
            return Err(LedgerError::Config(
                "max_transactions_per_block must be at least 1".into(),
            ));
        }
        Ok(self)
    }
}
