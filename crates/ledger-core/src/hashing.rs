//! Canonical encodings and the SHA-256 digest every other component uses.
//!
//! Transactions are encoded as compact JSON in declaration order. A block
//! header is the decimal `index`, decimal `timestamp`, the JSON transaction
//! list, `previous_hash`, decimal `nonce` and `merkle_root`, concatenated
//! without separators.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{TaskAction, Transaction};

/// Lowercase hex SHA-256 of `bytes`.
pub fn digest(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

// Plain structs, string-keyed maps only: serde_json cannot fail here.
fn to_json<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("ledger types always serialize to JSON")
}

pub fn canonical_transaction(tx: &Transaction) -> Vec<u8> {
    to_json(tx)
}

pub fn canonical_transactions(txs: &[Transaction]) -> Vec<u8> {
    to_json(txs)
}

#[derive(Serialize)]
struct Unsigned<'a> {
    id: &'a str,
    from: &'a str,
    to: &'a str,
    payload: &'a TaskAction,
    timestamp: u64,
}

/// Transaction encoding with the signature field removed.
pub fn canonical_unsigned(tx: &Transaction) -> Vec<u8> {
    to_json(&Unsigned {
        id: &tx.id,
        from: &tx.from,
        to: &tx.to,
        payload: &tx.payload,
        timestamp: tx.timestamp,
    })
}

/// Pre-hashed header prefix; only the nonce varies between attempts.
#[derive(Clone)]
pub struct HeaderTemplate {
    prefix: Sha256,
    merkle_root: String,
}

impl HeaderTemplate {
    pub fn new(
        index: u64,
        timestamp: u64,
        transactions: &[Transaction],
        previous_hash: &str,
        merkle_root: &str,
    ) -> Self {
        let mut prefix = Sha256::new();
        prefix.update(index.to_string());
        prefix.update(timestamp.to_string());
        prefix.update(canonical_transactions(transactions));
        prefix.update(previous_hash);
        Self {
            prefix,
            merkle_root: merkle_root.to_string(),
        }
    }

    pub fn digest_bytes(&self, nonce: u64) -> [u8; 32] {
        let mut hasher = self.prefix.clone();
        hasher.update(nonce.to_string());
        hasher.update(&self.merkle_root);
        hasher.finalize().into()
    }

    pub fn hash(&self, nonce: u64) -> String {
        hex::encode(self.digest_bytes(nonce))
    }
}

pub fn block_hash(
    index: u64,
    timestamp: u64,
    transactions: &[Transaction],
    previous_hash: &str,
    nonce: u64,
    merkle_root: &str,
) -> String {
    HeaderTemplate::new(index, timestamp, transactions, previous_hash, merkle_root).hash(nonce)
}

/// Number of leading zero hex digits in a raw digest.
pub fn leading_zero_nibbles(hash: &[u8]) -> u32 {
    let mut total = 0u32;
    for b in hash {
        if *b == 0 {
            total += 2;
        } else {
            if b >> 4 == 0 {
                total += 1;
            }
            break;
        }
    }
    total
}

/// `hash` starts with at least `difficulty` `'0'` characters.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|c| c == b'0')
}
