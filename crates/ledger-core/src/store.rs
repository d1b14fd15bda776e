//! Persistence seam for ledgers.
//!
//! The trait lives in `ledger-core` so that `ChainLedger` can be generic over
//! it without depending on a storage engine. Ledgers are whole documents keyed
//! by user id; writes are conditional on the stored tip.

use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::Ledger;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Stored tip differs from the expected one; nothing was written.
    Conflict { current: Option<String> },
}

pub trait LedgerStore: Send + Sync {
    fn get_ledger(&self, user_id: &str) -> Result<Option<Ledger>>;

    /// Write `ledger` only if the stored `last_block_hash` equals `expected`.
    /// `expected = None` means no ledger may exist yet for this user.
    fn save_ledger(&self, ledger: &Ledger, expected: Option<&str>) -> Result<SaveOutcome>;

    fn list_users(&self) -> Result<Vec<String>>;
}

/// In-process store. All data is lost when dropped.
#[derive(Default)]
pub struct MemoryStore {
    ledgers: RwLock<HashMap<String, Ledger>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn get_ledger(&self, user_id: &str) -> Result<Option<Ledger>> {
        Ok(self.ledgers.read().get(user_id).cloned())
    }

    fn save_ledger(&self, ledger: &Ledger, expected: Option<&str>) -> Result<SaveOutcome> {
        let mut ledgers = self.ledgers.write();
        let current = ledgers
            .get(&ledger.user_id)
            .map(|l| l.last_block_hash.clone());
        if current.as_deref() != expected {
            return Ok(SaveOutcome::Conflict { current });
        }
        ledgers.insert(ledger.user_id.clone(), ledger.clone());
        Ok(SaveOutcome::Saved)
    }

    fn list_users(&self) -> Result<Vec<String>> {
        let mut users: Vec<String> = self.ledgers.read().keys().cloned().collect();
        users.sort();
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Block, Ledger};

    fn ledger(user: &str, tip: &str) -> Ledger {
        let genesis = Block {
            index: 0,
            timestamp: 1,
            transactions: vec![],
            previous_hash: "0".into(),
            hash: tip.into(),
            nonce: 1,
            merkle_root: "m".into(),
            difficulty: 0,
            miner: "system".into(),
        };
        Ledger::new(user, genesis)
    }

    #[test]
    fn insert_requires_absence() {
        let store = MemoryStore::new();
        assert_eq!(store.save_ledger(&ledger("a", "h0"), None).unwrap(), SaveOutcome::Saved);
        assert_eq!(
            store.save_ledger(&ledger("a", "h1"), None).unwrap(),
            SaveOutcome::Conflict {
                current: Some("h0".into())
            }
        );
        assert_eq!(store.get_ledger("a").unwrap().unwrap().last_block_hash, "h0");
    }

    #[test]
    fn update_requires_matching_tip() {
        let store = MemoryStore::new();
        store.save_ledger(&ledger("a", "h0"), None).unwrap();
        assert_eq!(
            store.save_ledger(&ledger("a", "h2"), Some("h1")).unwrap(),
            SaveOutcome::Conflict {
                current: Some("h0".into())
            }
        );
        assert_eq!(
            store.save_ledger(&ledger("a", "h1"), Some("h0")).unwrap(),
            SaveOutcome::Saved
        );
        assert_eq!(store.get_ledger("a").unwrap().unwrap().last_block_hash, "h1");
    }

    #[test]
    fn update_of_missing_ledger_conflicts() {
        let store = MemoryStore::new();
        assert_eq!(
            store.save_ledger(&ledger("a", "h1"), Some("h0")).unwrap(),
            SaveOutcome::Conflict { current: None }
        );
        assert!(store.get_ledger("a").unwrap().is_none());
    }

    #[test]
    fn lists_users_sorted() {
        let store = MemoryStore::new();
        store.save_ledger(&ledger("bob", "h"), None).unwrap();
        store.save_ledger(&ledger("alice", "h"), None).unwrap();
        assert_eq!(store.list_users().unwrap(), vec!["alice", "bob"]);
    }
}
