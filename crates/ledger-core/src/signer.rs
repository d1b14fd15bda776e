//! Hash commitments over transactions.
//!
//! A "signature" here is `digest(canonical_unsigned(tx) ‖ key)`. Verification
//! recomputes it with the supplied key, so it only succeeds with the exact key
//! used to sign. The two halves of a [`KeyPair`] are unrelated random strings:
//! verifying with the public half of a pair signed with its private half fails.
//! Treat this as a tamper-evidence tag, not as authentication.

use serde::{Deserialize, Serialize};

use crate::constants::KEY_BYTES;
use crate::hashing::{canonical_unsigned, digest};
use crate::{random_id, Transaction};

pub fn sign(tx: &Transaction, secret: &str) -> String {
    let mut data = canonical_unsigned(tx);
    data.extend_from_slice(secret.as_bytes());
    digest(data)
}

pub fn verify(tx: &Transaction, key: &str) -> bool {
    match &tx.signature {
        Some(signature) => *signature == sign(tx, key),
        None => false,
    }
}

impl Transaction {
    pub fn signed(mut self, secret: &str) -> Self {
        self.signature = Some(sign(&self, secret));
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl KeyPair {
    /// Two independent random 64-hex-character strings.
    pub fn generate() -> Self {
        Self {
            public_key: random_id(KEY_BYTES),
            private_key: random_id(KEY_BYTES),
        }
    }
}
