use crate::hashing::{canonical_transaction, digest};
use crate::Transaction;

/// Bottom-up merkle root over `txs` in stored order. An odd node at the end of
/// a level is paired with itself; the empty list commits to `digest("")`.
pub fn merkle_root(txs: &[Transaction]) -> String {
    if txs.is_empty() {
        return digest("");
    }
    let mut level: Vec<String> = txs
        .iter()
        .map(|t| digest(canonical_transaction(t)))
        .collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next.push(digest(format!("{left}{right}")));
        }
        level = next;
    }
    level.swap_remove(0)
}
