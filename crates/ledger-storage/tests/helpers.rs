use std::fs;

use ledger_core::{ChainLedger, LedgerConfig};
use ledger_storage::SledStore;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

pub fn create_temp_store() -> (TempDir, SledStore) {
    // Create a temporary directory for the sled database
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (
        temp_dir,
        SledStore::open(&db_path).expect("Failed to open SledStore"),
    )
}

pub fn easy_chain(store: SledStore) -> ChainLedger<SledStore> {
    ChainLedger::new(
        Arc::new(store),
        LedgerConfig {
            difficulty: 1,
            ..LedgerConfig::default()
        },
    )
}

#[allow(dead_code)]
pub fn teardown_store(temp_dir: TempDir, store: SledStore) {
    let db_path = temp_dir.path().to_path_buf();
    store.clear().expect("Failed to clear the store");
    drop(store);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    // Verify the directory is removed
    assert!(!db_path.exists(), "Database directory should be removed");
}
