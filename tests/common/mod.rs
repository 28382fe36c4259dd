//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use javelin::ledger::{ChainLinker, Entry, EntryDraft, SqliteChainStore};
use javelin::types::{ConversationKey, LinkConfig, Role};

/// A temporary directory holding a ledger database file.
pub struct TempLedger {
    pub dir: TempDir,
    pub store: Arc<SqliteChainStore>,
}

impl TempLedger {
    pub fn path(&self) -> std::path::PathBuf {
        self.dir.path().join("ledger.db")
    }

    /// Open another connection to the same database file.
    pub fn reopen(&self) -> SqliteChainStore {
        SqliteChainStore::open(&self.path()).expect("should reopen ledger")
    }

    pub fn linker(&self) -> ChainLinker<SqliteChainStore> {
        ChainLinker::new(Arc::clone(&self.store), LinkConfig::default())
    }
}

/// Create a ledger database in a fresh temp directory.
pub fn temp_ledger() -> TempLedger {
    let dir = TempDir::new().expect("should create temp dir");
    let store =
        SqliteChainStore::open(&dir.path().join("ledger.db")).expect("should open ledger");
    TempLedger {
        dir,
        store: Arc::new(store),
    }
}

pub fn key() -> ConversationKey {
    ConversationKey::new("alice", "conv-1")
}

/// A fixed instant `secs` seconds after 2024-01-01T00:00:00Z.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200 + secs, 0).unwrap()
}

/// Link `n` user messages "m0".."m{n-1}" one second apart.
pub fn link_messages(
    linker: &ChainLinker<SqliteChainStore>,
    key: &ConversationKey,
    n: usize,
) -> Vec<Entry> {
    (0..n)
        .map(|i| {
            let draft = EntryDraft::message(Role::User, format!("m{i}")).with_seq(i as i64);
            linker
                .link_at(key, ts(i as i64), draft)
                .expect("should link message")
        })
        .collect()
}
