use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod chain;
pub mod config;
pub mod constants;
pub mod error;
pub mod hashing;
pub mod merkle;
pub mod pow;
pub mod signer;
pub mod store;
pub mod validate;

pub use chain::{ChainLedger, TaskChange};
pub use config::LedgerConfig;
pub use error::{LedgerError, Result};
pub use merkle::merkle_root;
pub use store::{LedgerStore, MemoryStore, SaveOutcome};

use constants::{GENESIS_MESSAGE, GENESIS_TX_ID, SYSTEM_ACCOUNT, TX_ID_BYTES};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Random lowercase hex identifier of `bytes` random bytes.
pub fn random_id(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// State of a task as recorded in a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl TaskSnapshot {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            completed: false,
            due_date: None,
            priority: Priority::default(),
        }
    }
}

/// Partial update applied over the current snapshot of a task.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
    pub due_date: Option<String>,
    pub priority: Option<Priority>,
}

impl TaskPatch {
    pub fn apply(&self, base: &TaskSnapshot) -> TaskSnapshot {
        TaskSnapshot {
            title: self.title.clone().unwrap_or_else(|| base.title.clone()),
            description: self.description.clone().or_else(|| base.description.clone()),
            completed: self.completed.unwrap_or(base.completed),
            due_date: self.due_date.clone().or_else(|| base.due_date.clone()),
            priority: self.priority.unwrap_or(base.priority),
        }
    }
}

/// Transaction payload. The `action` tag is always serialized first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum TaskAction {
    Genesis {
        message: String,
    },
    Create {
        task_id: String,
        task_data: TaskSnapshot,
    },
    Complete {
        task_id: String,
        task_data: TaskSnapshot,
    },
    Update {
        task_id: String,
        task_data: TaskSnapshot,
        previous_state: TaskSnapshot,
    },
    Delete {
        task_id: String,
        task_data: TaskSnapshot,
        previous_state: TaskSnapshot,
    },
}

impl TaskAction {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            TaskAction::Genesis { .. } => None,
            TaskAction::Create { task_id, .. }
            | TaskAction::Complete { task_id, .. }
            | TaskAction::Update { task_id, .. }
            | TaskAction::Delete { task_id, .. } => Some(task_id),
        }
    }

    pub fn task_data(&self) -> Option<&TaskSnapshot> {
        match self {
            TaskAction::Genesis { .. } => None,
            TaskAction::Create { task_data, .. }
            | TaskAction::Complete { task_data, .. }
            | TaskAction::Update { task_data, .. }
            | TaskAction::Delete { task_data, .. } => Some(task_data),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskAction::Genesis { .. } => "GENESIS",
            TaskAction::Create { .. } => "CREATE",
            TaskAction::Complete { .. } => "COMPLETE",
            TaskAction::Update { .. } => "UPDATE",
            TaskAction::Delete { .. } => "DELETE",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub from: String,
    pub to: String,
    pub payload: TaskAction,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Transaction {
    /// Unsigned transaction with a fresh random id, stamped now.
    pub fn new(from: impl Into<String>, to: impl Into<String>, payload: TaskAction) -> Self {
        Self {
            id: random_id(TX_ID_BYTES),
            from: from.into(),
            to: to.into(),
            payload,
            timestamp: now_millis(),
            signature: None,
        }
    }

    /// The synthetic transaction sealed into every genesis block.
    pub fn genesis(user_id: &str) -> Self {
        Self {
            id: GENESIS_TX_ID.to_string(),
            from: SYSTEM_ACCOUNT.to_string(),
            to: user_id.to_string(),
            payload: TaskAction::Genesis {
                message: GENESIS_MESSAGE.to_string(),
            },
            timestamp: now_millis(),
            signature: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub hash: String,
    pub nonce: u64,
    pub merkle_root: String,
    pub difficulty: u32,
    pub miner: String,
}

impl Block {
    /// Hash recomputed from the block's own fields.
    pub fn compute_hash(&self) -> String {
        hashing::block_hash(
            self.index,
            self.timestamp,
            &self.transactions,
            &self.previous_hash,
            self.nonce,
            &self.merkle_root,
        )
    }
}

/// A user's chain plus the transactions still waiting to be mined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    pub user_id: String,
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub pending_transactions: Vec<Transaction>,
    pub last_block_hash: String,
    pub total_blocks: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Ledger {
    pub fn new(user_id: impl Into<String>, genesis: Block) -> Self {
        let now = now_millis();
        Self {
            user_id: user_id.into(),
            last_block_hash: genesis.hash.clone(),
            blocks: vec![genesis],
            pending_transactions: Vec::new(),
            total_blocks: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Seal a freshly mined block onto the chain and drop its transactions
    /// from the front of the pending queue.
    pub fn append(&mut self, block: Block) {
        let mined = block.transactions.len().min(self.pending_transactions.len());
        self.pending_transactions.drain(..mined);
        self.last_block_hash = block.hash.clone();
        self.blocks.push(block);
        self.total_blocks = self.blocks.len() as u64;
        self.updated_at = now_millis();
    }

    /// Header bookkeeping agrees with the block list.
    pub fn is_consistent(&self) -> bool {
        self.total_blocks == self.blocks.len() as u64
            && self.tip().map(|b| b.hash.as_str()) == Some(self.last_block_hash.as_str())
    }

    /// Every sealed transaction touching `task_id`, oldest first.
    pub fn task_history<'a>(&'a self, task_id: &'a str) -> impl Iterator<Item = &'a Transaction> {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(move |tx| tx.payload.task_id() == Some(task_id))
    }

    /// Current state of a task, `None` if it never existed or was deleted.
    pub fn latest_snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
        snapshot_after(self.task_history(task_id))
    }

    /// State of a task once the pending queue is mined as well.
    pub fn pending_snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
        let queued = self
            .pending_transactions
            .iter()
            .filter(move |tx| tx.payload.task_id() == Some(task_id));
        snapshot_after(self.task_history(task_id).chain(queued))
    }
}

fn snapshot_after<'a>(history: impl Iterator<Item = &'a Transaction>) -> Option<TaskSnapshot> {
    match history.last().map(|tx| &tx.payload) {
        None | Some(TaskAction::Delete { .. }) => None,
        Some(action) => action.task_data().cloned(),
    }
}
