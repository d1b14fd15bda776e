//! Proof-of-work nonce search.
//!
//! The search starts from nonce 1 (increment, then hash) and stops at the first
//! header hash with at least `difficulty` leading zero hex digits. Timestamp and
//! merkle root are fixed before the loop starts.

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{LedgerError, Result};
use crate::hashing::{leading_zero_nibbles, HeaderTemplate};
use crate::{merkle_root, now_millis, Block, Transaction};

// Deadline is polled once per this many nonces.
const DEADLINE_POLL_INTERVAL: u64 = 1024;

/// Deadline and cancellation shared with a running search.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
    expired: Arc<AtomicBool>,
}

impl StopSignal {
    /// A signal that never fires unless cancelled.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            ..Self::default()
        }
    }

    pub fn from_config_ms(timeout_ms: Option<u64>) -> Self {
        match timeout_ms {
            Some(ms) => Self::with_timeout(Duration::from_millis(ms)),
            None => Self::never(),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn should_stop(&self, nonce: u64) -> bool {
        if self.is_cancelled() || self.expired.load(Ordering::Relaxed) {
            return true;
        }
        if nonce % DEADLINE_POLL_INTERVAL == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    self.expired.store(true, Ordering::Relaxed);
                    return true;
                }
            }
        }
        false
    }

    fn halted(&self, index: u64, started: Instant) -> LedgerError {
        if self.is_cancelled() {
            LedgerError::MiningCancelled { index }
        } else {
            LedgerError::MiningTimeout {
                index,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
        }
    }
}

/// Everything about the block except its nonce.
struct Candidate {
    index: u64,
    timestamp: u64,
    transactions: Vec<Transaction>,
    previous_hash: String,
    merkle_root: String,
    difficulty: u32,
    miner: String,
    header: HeaderTemplate,
}

impl Candidate {
    fn new(
        index: u64,
        transactions: Vec<Transaction>,
        previous_hash: &str,
        miner: &str,
        difficulty: u32,
    ) -> Self {
        let timestamp = now_millis();
        let merkle_root = merkle_root(&transactions);
        let header = HeaderTemplate::new(
            index,
            timestamp,
            &transactions,
            previous_hash,
            &merkle_root,
        );
        Self {
            index,
            timestamp,
            transactions,
            previous_hash: previous_hash.to_string(),
            merkle_root,
            difficulty,
            miner: miner.to_string(),
            header,
        }
    }

    fn solves(&self, nonce: u64) -> bool {
        leading_zero_nibbles(&self.header.digest_bytes(nonce)) >= self.difficulty
    }

    fn seal(self, nonce: u64, started: Instant) -> Block {
        let hash = self.header.hash(nonce);
        info!(
            "Mined block {} with nonce {} and hash {} in {} ms",
            self.index,
            nonce,
            hash,
            started.elapsed().as_millis()
        );
        Block {
            index: self.index,
            timestamp: self.timestamp,
            transactions: self.transactions,
            previous_hash: self.previous_hash,
            hash,
            nonce,
            merkle_root: self.merkle_root,
            difficulty: self.difficulty,
            miner: self.miner,
        }
    }
}

/// Unbounded sequential search. Blocks the calling thread until a nonce is found.
pub fn mine(
    index: u64,
    transactions: Vec<Transaction>,
    previous_hash: &str,
    miner: &str,
    difficulty: u32,
) -> Block {
    mine_with(
        index,
        transactions,
        previous_hash,
        miner,
        difficulty,
        &StopSignal::never(),
    )
    .expect("nonce space exhausted (practically impossible)")
}

/// Sequential search that gives up when `stop` fires.
pub fn mine_with(
    index: u64,
    transactions: Vec<Transaction>,
    previous_hash: &str,
    miner: &str,
    difficulty: u32,
    stop: &StopSignal,
) -> Result<Block> {
    let started = Instant::now();
    let candidate = Candidate::new(index, transactions, previous_hash, miner, difficulty);
    debug!("Mining block {} with difficulty {}", index, difficulty);

    let mut nonce = 0u64;
    while nonce < u64::MAX {
        nonce += 1;
        if candidate.solves(nonce) {
            return Ok(candidate.seal(nonce, started));
        }
        if stop.should_stop(nonce) {
            break;
        }
    }
    Err(stop.halted(index, started))
}

/// Parallel search over the nonce range. `find_first` keeps the result equal to
/// the smallest solving nonce, the same one `mine_with` would return.
pub fn mine_parallel(
    index: u64,
    transactions: Vec<Transaction>,
    previous_hash: &str,
    miner: &str,
    difficulty: u32,
    stop: &StopSignal,
) -> Result<Block> {
    let started = Instant::now();
    let candidate = Candidate::new(index, transactions, previous_hash, miner, difficulty);
    debug!(
        "Mining block {} with difficulty {} on {} threads",
        index,
        difficulty,
        rayon::current_num_threads()
    );

    let found = (1u64..u64::MAX)
        .into_par_iter()
        .find_first(|&nonce| stop.should_stop(nonce) || candidate.solves(nonce));

    match found {
        Some(nonce) if candidate.solves(nonce) => Ok(candidate.seal(nonce, started)),
        _ => Err(stop.halted(index, started)),
    }
}
