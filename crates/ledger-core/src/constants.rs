pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const POW_TARGET_DIFFICULTY: u32 = 4;
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 10;
pub const MINING_TIMEOUT_MS: u64 = 30_000;
pub const TX_ID_BYTES: usize = 12;
pub const KEY_BYTES: usize = 32;

pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const GENESIS_TX_ID: &str = "genesis";
pub const GENESIS_MESSAGE: &str = "Genesis block created";
pub const SYSTEM_ACCOUNT: &str = "system";
