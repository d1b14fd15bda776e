//! Block and chain validation.
//!
//! `validate_chain` checks every block against its predecessor but never checks
//! block 0 on its own, so a tampered genesis block and a one-block chain both
//! pass. `validate_chain_with_genesis` closes that gap and is opt-in.

use thiserror::Error;
use tracing::debug;

use crate::constants::GENESIS_PREVIOUS_HASH;
use crate::hashing::meets_difficulty;
use crate::{merkle_root, Block};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BlockFault {
    #[error("block is missing its {0}")]
    MissingField(&'static str),
    #[error("stored hash {stored} does not match recomputed {computed}")]
    HashMismatch { stored: String, computed: String },
    #[error("hash does not have {difficulty} leading zeros")]
    InsufficientWork { difficulty: u32 },
    #[error("stored merkle root {stored} does not match recomputed {computed}")]
    MerkleMismatch { stored: String, computed: String },
    #[error("previous hash {found} does not link to {expected}")]
    BrokenLink { expected: String, found: String },
    #[error("index {found} does not follow {expected}")]
    IndexGap { expected: u64, found: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("block {index}: {fault}")]
pub struct ChainFault {
    pub index: usize,
    pub fault: BlockFault,
}

pub fn check_block(block: &Block, previous: Option<&Block>) -> Result<(), BlockFault> {
    if block.hash.is_empty() {
        return Err(BlockFault::MissingField("hash"));
    }
    if block.previous_hash.is_empty() {
        return Err(BlockFault::MissingField("previousHash"));
    }
    if block.merkle_root.is_empty() {
        return Err(BlockFault::MissingField("merkleRoot"));
    }

    let computed = block.compute_hash();
    if block.hash != computed {
        return Err(BlockFault::HashMismatch {
            stored: block.hash.clone(),
            computed,
        });
    }

    if !meets_difficulty(&block.hash, block.difficulty) {
        return Err(BlockFault::InsufficientWork {
            difficulty: block.difficulty,
        });
    }

    let computed = merkle_root(&block.transactions);
    if block.merkle_root != computed {
        return Err(BlockFault::MerkleMismatch {
            stored: block.merkle_root.clone(),
            computed,
        });
    }

    if let Some(previous) = previous {
        if block.previous_hash != previous.hash {
            return Err(BlockFault::BrokenLink {
                expected: previous.hash.clone(),
                found: block.previous_hash.clone(),
            });
        }
        let expected = previous.index + 1;
        if block.index != expected {
            return Err(BlockFault::IndexGap {
                expected,
                found: block.index,
            });
        }
    }
    Ok(())
}

pub fn validate_block(block: &Block, previous: Option<&Block>) -> bool {
    check_block(block, previous).is_ok()
}

/// First failing block, checking each block against its predecessor from
/// index 1 on.
pub fn check_chain(blocks: &[Block]) -> Result<(), ChainFault> {
    for (i, pair) in blocks.windows(2).enumerate() {
        check_block(&pair[1], Some(&pair[0])).map_err(|fault| ChainFault {
            index: i + 1,
            fault,
        })?;
    }
    Ok(())
}

pub fn validate_chain(blocks: &[Block]) -> bool {
    match check_chain(blocks) {
        Ok(()) => true,
        Err(fault) => {
            debug!("chain validation failed: {fault}");
            false
        }
    }
}

pub fn check_genesis(genesis: &Block) -> Result<(), BlockFault> {
    check_block(genesis, None)?;
    if genesis.index != 0 {
        return Err(BlockFault::IndexGap {
            expected: 0,
            found: genesis.index,
        });
    }
    if genesis.previous_hash != GENESIS_PREVIOUS_HASH {
        return Err(BlockFault::BrokenLink {
            expected: GENESIS_PREVIOUS_HASH.to_string(),
            found: genesis.previous_hash.clone(),
        });
    }
    Ok(())
}

/// `check_chain` plus a standalone check of block 0.
pub fn check_chain_with_genesis(blocks: &[Block]) -> Result<(), ChainFault> {
    if let Some(genesis) = blocks.first() {
        check_genesis(genesis).map_err(|fault| ChainFault { index: 0, fault })?;
    }
    check_chain(blocks)
}

pub fn validate_chain_with_genesis(blocks: &[Block]) -> bool {
    match check_chain_with_genesis(blocks) {
        Ok(()) => true,
        Err(fault) => {
            debug!("chain validation failed: {fault}");
            false
        }
    }
}
