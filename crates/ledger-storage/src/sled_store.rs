use anyhow::{Context, Result};
use ledger_core::{Ledger, LedgerStore, SaveOutcome};
use sled::{Db, IVec};
use std::path::Path;
use tracing::{debug, info};

const TREE_LEDGERS: &str = "ledgers";

/// Ledger documents stored as JSON in a sled tree keyed by user id.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    let db = sled::open(path).with_context(|| format!("opening sled at {}", path.display()))?;
    info!("sled store opened at {}", path.display());
    Ok(Self { db })
  }

  fn ledgers(&self) -> Result<sled::Tree> {
    Ok(self.db.open_tree(TREE_LEDGERS)?)
  }

  pub fn clear(&self) -> Result<()> {
    self.ledgers()?.clear()?;
    self.db.flush()?;
    Ok(())
  }
}

fn decode(bytes: &IVec) -> Result<Ledger> {
  serde_json::from_slice(bytes).context("decoding stored ledger")
}

fn tip_of(bytes: Option<&IVec>) -> Result<Option<String>> {
  bytes.map(|b| decode(b).map(|l| l.last_block_hash)).transpose()
}

impl LedgerStore for SledStore {
  fn get_ledger(&self, user_id: &str) -> Result<Option<Ledger>> {
    self
      .ledgers()?
      .get(user_id.as_bytes())?
      .map(|ivec| decode(&ivec))
      .transpose()
  }

  fn save_ledger(&self, ledger: &Ledger, expected: Option<&str>) -> Result<SaveOutcome> {
    let tree = self.ledgers()?;
    let key = ledger.user_id.as_bytes();
    let current = tree.get(key)?;

    let current_tip = tip_of(current.as_ref())?;
    if current_tip.as_deref() != expected {
      return Ok(SaveOutcome::Conflict {
        current: current_tip,
      });
    }

    // Swap against the exact bytes we checked so a write in between is caught.
    let bytes = serde_json::to_vec(ledger)?;
    match tree.compare_and_swap(key, current, Some(bytes))? {
      Ok(()) => {
        self.db.flush()?;
        debug!(
          "saved ledger for {} at tip {}",
          ledger.user_id, ledger.last_block_hash
        );
        Ok(SaveOutcome::Saved)
      }
      Err(cas) => Ok(SaveOutcome::Conflict {
        current: tip_of(cas.current.as_ref())?,
      }),
    }
  }

  fn list_users(&self) -> Result<Vec<String>> {
    self
      .ledgers()?
      .iter()
      .keys()
      .map(|key| Ok(String::from_utf8(key?.to_vec())?))
      .collect()
  }
}
