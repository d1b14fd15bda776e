//! Per-user ledger orchestration.
//!
//! Every mutation of a user's ledger runs under that user's mutex and is
//! persisted with a write conditioned on the tip it started from, so appends
//! never fork a chain even when several `ChainLedger` handles share a store.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::constants::GENESIS_PREVIOUS_HASH;
use crate::error::{LedgerError, Result};
use crate::pow::{self, StopSignal};
use crate::store::{LedgerStore, SaveOutcome};
use crate::validate::{check_chain, check_chain_with_genesis, ChainFault};
use crate::{random_id, Block, Ledger, TaskAction, TaskPatch, TaskSnapshot, Transaction};

/// A task mutation to be recorded. Prior state is resolved from the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskChange {
    Create { task_id: String, task: TaskSnapshot },
    Complete { task_id: String },
    Update { task_id: String, patch: TaskPatch },
    Delete { task_id: String },
}

impl TaskChange {
    /// Create with a freshly generated task id.
    pub fn create(task: TaskSnapshot) -> Self {
        TaskChange::Create {
            task_id: random_id(crate::constants::TX_ID_BYTES),
            task,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            TaskChange::Create { task_id, .. }
            | TaskChange::Complete { task_id }
            | TaskChange::Update { task_id, .. }
            | TaskChange::Delete { task_id } => task_id,
        }
    }

    /// Prior state covers sealed blocks followed by the pending queue.
    fn into_action(self, ledger: &Ledger) -> Result<TaskAction> {
        let current = |task_id: &str| {
            ledger
                .pending_snapshot(task_id)
                .ok_or_else(|| LedgerError::TaskNotFound {
                    user_id: ledger.user_id.clone(),
                    task_id: task_id.to_string(),
                })
        };
        Ok(match self {
            TaskChange::Create { task_id, task } => {
                if ledger.pending_snapshot(&task_id).is_some() {
                    return Err(LedgerError::TaskExists {
                        user_id: ledger.user_id.clone(),
                        task_id,
                    });
                }
                TaskAction::Create {
                    task_id,
                    task_data: task,
                }
            }
            TaskChange::Complete { task_id } => {
                let mut task_data = current(&task_id)?;
                task_data.completed = true;
                TaskAction::Complete { task_id, task_data }
            }
            TaskChange::Update { task_id, patch } => {
                let previous_state = current(&task_id)?;
                TaskAction::Update {
                    task_data: patch.apply(&previous_state),
                    task_id,
                    previous_state,
                }
            }
            TaskChange::Delete { task_id } => {
                let previous_state = current(&task_id)?;
                TaskAction::Delete {
                    task_data: previous_state.clone(),
                    task_id,
                    previous_state,
                }
            }
        })
    }
}

pub struct ChainLedger<S: LedgerStore + ?Sized> {
    store: Arc<S>,
    config: Arc<LedgerConfig>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl<S: LedgerStore + ?Sized> Clone for ChainLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<S: LedgerStore + ?Sized> ChainLedger<S> {
    pub fn new(store: Arc<S>, config: LedgerConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run `f` under `user_id`'s mutex. The entry leaves the map again once no
    /// caller holds or waits on it.
    fn with_user_lock<T>(&self, user_id: &str, f: impl FnOnce() -> T) -> T {
        let lock = Arc::clone(self.locks.lock().entry(user_id.to_string()).or_default());
        let out = {
            let _guard = lock.lock();
            f()
        };
        // Clones are taken and dropped only under the map lock.
        let mut locks = self.locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(user_id);
        }
        drop(lock);
        out
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.lock().len()
    }

    fn mine(
        &self,
        index: u64,
        txs: Vec<Transaction>,
        previous_hash: &str,
        miner: &str,
    ) -> Result<Block> {
        let stop = StopSignal::from_config_ms(self.config.mining_timeout_ms);
        let difficulty = self.config.difficulty;
        if self.config.parallel_mining {
            pow::mine_parallel(index, txs, previous_hash, miner, difficulty, &stop)
        } else {
            pow::mine_with(index, txs, previous_hash, miner, difficulty, &stop)
        }
    }

    /// Mine the genesis block and store a new ledger. Fails if one exists.
    pub fn create_ledger(&self, user_id: &str) -> Result<Ledger> {
        self.with_user_lock(user_id, || self.create_locked(user_id))
    }

    fn create_locked(&self, user_id: &str) -> Result<Ledger> {
        if self.store.get_ledger(user_id)?.is_some() {
            return Err(LedgerError::AlreadyExists(user_id.to_string()));
        }
        let genesis = self.mine(
            0,
            vec![Transaction::genesis(user_id)],
            GENESIS_PREVIOUS_HASH,
            &self.config.genesis_miner,
        )?;
        let ledger = Ledger::new(user_id, genesis);
        match self.store.save_ledger(&ledger, None)? {
            SaveOutcome::Saved => {
                info!("created ledger for {user_id} with genesis {}", ledger.last_block_hash);
                Ok(ledger)
            }
            SaveOutcome::Conflict { .. } => Err(LedgerError::AlreadyExists(user_id.to_string())),
        }
    }

    /// Snapshot of the stored ledger.
    pub fn get_ledger(&self, user_id: &str) -> Result<Ledger> {
        self.store
            .get_ledger(user_id)?
            .ok_or_else(|| LedgerError::NotFound(user_id.to_string()))
    }

    pub fn list_users(&self) -> Result<Vec<String>> {
        Ok(self.store.list_users()?)
    }

    /// Queue `tx` and seal the pending queue into a new block.
    pub fn add_transaction(&self, user_id: &str, tx: Transaction) -> Result<Block> {
        self.append(user_id, |_| Ok(tx))
    }

    /// Record a task change as a self-addressed transaction, optionally signed.
    pub fn record(
        &self,
        user_id: &str,
        change: TaskChange,
        signing_key: Option<&str>,
    ) -> Result<Block> {
        self.append(user_id, |ledger| {
            let tx = Transaction::new(user_id, user_id, change.into_action(ledger)?);
            Ok(match signing_key {
                Some(key) => tx.signed(key),
                None => tx,
            })
        })
    }

    /// Retry transactions left pending by an earlier timeout.
    pub fn mine_pending(&self, user_id: &str) -> Result<Option<Block>> {
        self.with_user_lock(user_id, || {
            let ledger = self.get_ledger(user_id)?;
            if ledger.pending_transactions.is_empty() {
                return Ok(None);
            }
            self.seal_pending(ledger).map(Some)
        })
    }

    fn append(
        &self,
        user_id: &str,
        build: impl FnOnce(&Ledger) -> Result<Transaction>,
    ) -> Result<Block> {
        self.with_user_lock(user_id, || {
            let mut ledger = self.get_ledger(user_id)?;
            let tx = build(&ledger)?;
            debug!("queued {} transaction {} for {user_id}", tx.payload.name(), tx.id);
            ledger.pending_transactions.push(tx);
            self.seal_pending(ledger)
        })
    }

    fn seal_pending(&self, mut ledger: Ledger) -> Result<Block> {
        let expected = ledger.last_block_hash.clone();
        let batch_len = ledger
            .pending_transactions
            .len()
            .min(self.config.max_transactions_per_block);
        let batch = ledger.pending_transactions[..batch_len].to_vec();

        match self.mine(ledger.total_blocks, batch, &expected, &ledger.user_id) {
            Ok(block) => {
                ledger.append(block.clone());
                self.persist(&ledger, &expected)?;
                Ok(block)
            }
            Err(
                err @ (LedgerError::MiningTimeout { .. } | LedgerError::MiningCancelled { .. }),
            ) => {
                warn!(
                    "{err}; keeping {} transactions pending for {}",
                    ledger.pending_transactions.len(),
                    ledger.user_id
                );
                self.persist(&ledger, &expected)?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn persist(&self, ledger: &Ledger, expected: &str) -> Result<()> {
        match self.store.save_ledger(ledger, Some(expected))? {
            SaveOutcome::Saved => Ok(()),
            SaveOutcome::Conflict { current } => {
                let found = current.unwrap_or_else(|| "<none>".to_string());
                warn!(
                    "tip for {} moved from {expected} to {found}; append rejected",
                    ledger.user_id
                );
                Err(LedgerError::ConcurrencyConflict {
                    user_id: ledger.user_id.clone(),
                    expected: expected.to_string(),
                    found,
                })
            }
        }
    }

    /// First validation fault of the stored chain, if any.
    pub fn check_ledger(&self, user_id: &str) -> Result<Option<ChainFault>> {
        let ledger = self.get_ledger(user_id)?;
        let checked = if self.config.validate_genesis {
            check_chain_with_genesis(&ledger.blocks)
        } else {
            check_chain(&ledger.blocks)
        };
        if let Err(fault) = &checked {
            debug!("ledger for {user_id} failed validation: {fault}");
        }
        Ok(checked.err())
    }

    pub fn validate_ledger(&self, user_id: &str) -> Result<bool> {
        Ok(self.check_ledger(user_id)?.is_none())
    }

    /// Pretty-printed JSON dump of the whole ledger.
    pub fn export_ledger(&self, user_id: &str) -> Result<String> {
        let ledger = self.get_ledger(user_id)?;
        serde_json::to_string_pretty(&ledger).map_err(|e| LedgerError::Storage(e.into()))
    }
}
