//! In-process chain store.
//!
//! Useful for tests and for embedding the ledger where durability is handled
//! elsewhere. The whole map sits behind one `RwLock`, so the tail check and
//! the push in `append` happen under a single write guard.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use javelin_types::{ConversationKey, LedgerError};

use crate::entry::{Entry, NewEntry, TimelineRow};
use crate::store::{check_append, AppendOutcome, ChainStore, ChainTail};

#[derive(Default)]
pub struct MemoryChainStore {
    chains: RwLock<HashMap<ConversationKey, Vec<Entry>>>,
    next_id: AtomicI64,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<ConversationKey, Vec<Entry>>>, LedgerError> {
        self.chains
            .read()
            .map_err(|_| LedgerError::Storage("memory store lock poisoned".into()))
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<ConversationKey, Vec<Entry>>>, LedgerError> {
        self.chains
            .write()
            .map_err(|_| LedgerError::Storage("memory store lock poisoned".into()))
    }
}

fn tail_of(entries: &[Entry], at: Option<DateTime<Utc>>) -> Option<ChainTail> {
    entries
        .iter()
        .rev()
        .find(|e| at.map_or(true, |at| e.created_at <= at))
        .map(|e| ChainTail {
            hash: e.hash.clone(),
            created_at: e.created_at,
            index: e.index,
        })
}

impl ChainStore for MemoryChainStore {
    fn tail(
        &self,
        key: &ConversationKey,
        at: Option<DateTime<Utc>>,
    ) -> Result<Option<ChainTail>, LedgerError> {
        let chains = self.read()?;
        Ok(chains.get(key).and_then(|entries| tail_of(entries, at)))
    }

    fn append(&self, entry: &NewEntry) -> Result<AppendOutcome, LedgerError> {
        let mut chains = self.write()?;
        let entries = chains.entry(entry.key.clone()).or_default();
        let tail = tail_of(entries, None);
        if !check_append(entry, tail.as_ref())? {
            return Ok(AppendOutcome::Conflict { current: tail });
        }

        let stored = Entry {
            index: entries.len(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            key: entry.key.clone(),
            created_at: entry.created_at,
            kind: entry.kind,
            role: entry.role,
            step_id: entry.step_id.clone(),
            seq: entry.seq,
            state: entry.state.clone(),
            tool_name: entry.tool_name.clone(),
            prev_hash: entry.link.prev.clone(),
            hash: entry.link.hash.clone(),
            canonical: Some(entry.link.canonical.clone()),
        };
        entries.push(stored.clone());
        Ok(AppendOutcome::Appended(stored))
    }

    fn read_chain(&self, key: &ConversationKey) -> Result<Vec<Entry>, LedgerError> {
        let chains = self.read()?;
        Ok(chains.get(key).cloned().unwrap_or_default())
    }

    fn scan_timeline(
        &self,
        key: &ConversationKey,
        visit: &mut dyn FnMut(TimelineRow) -> ControlFlow<()>,
    ) -> Result<(), LedgerError> {
        // Snapshot first so the visitor never runs under the lock.
        let rows: Vec<TimelineRow> = self
            .read()?
            .get(key)
            .map(|entries| entries.iter().map(Entry::timeline_row).collect())
            .unwrap_or_default();
        for row in rows {
            if visit(row).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn conversations(&self) -> Result<Vec<ConversationKey>, LedgerError> {
        let chains = self.read()?;
        let mut keys: Vec<_> = chains
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{ChainLink, EntryDraft, GENESIS_HASH};
    use chrono::TimeZone;
    use javelin_types::Role;

    fn append(store: &MemoryChainStore, key: &ConversationKey, prev: &str, secs: i64) -> AppendOutcome {
        let at = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        let text = format!("entry at {secs}");
        store
            .append(&NewEntry::new(
                key.clone(),
                at,
                EntryDraft::message(Role::Assistant, text.clone()),
                ChainLink::compute(prev, text),
            ))
            .unwrap()
    }

    #[test]
    fn appends_extend_the_tail() {
        let store = MemoryChainStore::new();
        let key = ConversationKey::new("u", "c");
        let AppendOutcome::Appended(first) = append(&store, &key, GENESIS_HASH, 0) else {
            panic!("first append should land");
        };
        let AppendOutcome::Appended(second) = append(&store, &key, &first.hash, 1) else {
            panic!("second append should land");
        };
        assert_eq!(second.index, 1);
        assert!(second.id > first.id);
        assert_eq!(store.tail(&key, None).unwrap().unwrap().hash, second.hash);
        assert_eq!(store.read_chain(&key).unwrap().len(), 2);
    }

    #[test]
    fn stale_prev_conflicts() {
        let store = MemoryChainStore::new();
        let key = ConversationKey::new("u", "c");
        append(&store, &key, GENESIS_HASH, 0);
        assert!(matches!(
            append(&store, &key, GENESIS_HASH, 1),
            AppendOutcome::Conflict { current: Some(_) }
        ));
    }

    #[test]
    fn conversations_are_independent() {
        let store = MemoryChainStore::new();
        let a = ConversationKey::new("u", "a");
        let b = ConversationKey::new("u", "b");
        append(&store, &a, GENESIS_HASH, 0);
        assert!(matches!(
            append(&store, &b, GENESIS_HASH, 0),
            AppendOutcome::Appended(_)
        ));
        assert_eq!(store.conversations().unwrap(), vec![a, b]);
    }
}
