//! Chain linker: extends a conversation's chain by exactly one entry.
//!
//! Linking is an optimistic read-modify-write. Each attempt reads the tail,
//! computes the link against it and hands the store a conditional append.
//! When the tail moved in between, the attempt is discarded and the next one
//! starts from a fresh tail read; a computed `prev`/`hash` pair is never
//! replayed.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use javelin_types::{ConversationKey, LedgerError, LinkConfig};

use crate::entry::{truncate_micros, ChainLink, Entry, EntryDraft, NewEntry, GENESIS_HASH};
use crate::store::{AppendOutcome, ChainStore};

pub struct ChainLinker<S> {
    store: Arc<S>,
    config: LinkConfig,
}

impl<S> Clone for ChainLinker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: ChainStore> ChainLinker<S> {
    pub fn new(store: Arc<S>, config: LinkConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Append `draft` after the conversation's latest entry.
    ///
    /// The entry is stamped with the current time, or the tail's timestamp if
    /// that is later, so creation order never runs backwards.
    pub fn link(&self, key: &ConversationKey, draft: EntryDraft) -> Result<Entry, LedgerError> {
        self.link_anchored(key, None, draft)
    }

    /// Append `draft` after the latest entry created at or before `at`, and
    /// stamp it with `at`.
    ///
    /// Fails with [`LedgerError::AnchorBehindTail`] if the chain already has
    /// entries after `at`: linking there would fork it.
    pub fn link_at(
        &self,
        key: &ConversationKey,
        at: DateTime<Utc>,
        draft: EntryDraft,
    ) -> Result<Entry, LedgerError> {
        self.link_anchored(key, Some(truncate_micros(at)), draft)
    }

    /// The link `canonical` would get against the current tail, without
    /// persisting anything.
    pub fn preview(&self, key: &ConversationKey, canonical: &str) -> Result<ChainLink, LedgerError> {
        let tail = self.store.tail(key, None)?;
        let prev = tail.as_ref().map_or(GENESIS_HASH, |t| t.hash.as_str());
        Ok(ChainLink::compute(prev, canonical))
    }

    fn link_anchored(
        &self,
        key: &ConversationKey,
        at: Option<DateTime<Utc>>,
        draft: EntryDraft,
    ) -> Result<Entry, LedgerError> {
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.try_link(key, at, &draft) {
                Ok(AppendOutcome::Appended(entry)) => {
                    info!(
                        conversation = %key,
                        index = entry.index,
                        hash = %entry.hash,
                        attempt,
                        "entry linked"
                    );
                    return Ok(entry);
                }
                Ok(AppendOutcome::Conflict { current }) => {
                    if let (Some(at), Some(tail)) = (at, current.as_ref()) {
                        if tail.created_at > at {
                            return Err(LedgerError::AnchorBehindTail {
                                conversation: key.to_string(),
                                at: at.to_rfc3339(),
                                tail_at: tail.created_at.to_rfc3339(),
                            });
                        }
                    }
                    debug!(conversation = %key, attempt, "chain tail moved, retrying");
                }
                Err(e) if e.is_transient() => {
                    debug!(conversation = %key, attempt, error = %e, "store busy, retrying");
                }
                Err(e) => return Err(e),
            }

            if attempt < attempts && self.config.backoff_ms > 0 {
                thread::sleep(Duration::from_millis(
                    self.config.backoff_ms.saturating_mul(u64::from(attempt)),
                ));
            }
        }

        warn!(conversation = %key, attempts, "giving up on contended chain");
        Err(LedgerError::LinkContention {
            conversation: key.to_string(),
            attempts,
        })
    }

    fn try_link(
        &self,
        key: &ConversationKey,
        at: Option<DateTime<Utc>>,
        draft: &EntryDraft,
    ) -> Result<AppendOutcome, LedgerError> {
        let tail = self.store.tail(key, at)?;
        let prev = tail.as_ref().map_or(GENESIS_HASH, |t| t.hash.as_str());
        let link = ChainLink::compute(prev, draft.canonical.clone());

        let created_at = match at {
            Some(at) => at,
            None => {
                let now = truncate_micros(Utc::now());
                tail.as_ref().map_or(now, |t| now.max(t.created_at))
            }
        };

        self.store
            .append(&NewEntry::new(key.clone(), created_at, draft.clone(), link))
    }
}

#[cfg(test)]
mod tests {
    use std::ops::ControlFlow;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::{Duration as ChronoDuration, TimeZone};
    use javelin_types::Role;

    use super::*;
    use crate::entry::TimelineRow;
    use crate::memory::MemoryChainStore;
    use crate::store::ChainTail;

    fn config() -> LinkConfig {
        LinkConfig {
            max_attempts: 4,
            backoff_ms: 0,
        }
    }

    fn key() -> ConversationKey {
        ConversationKey::new("u", "c")
    }

    fn linker() -> ChainLinker<MemoryChainStore> {
        ChainLinker::new(Arc::new(MemoryChainStore::new()), config())
    }

    #[test]
    fn first_entry_links_to_genesis() {
        let linker = linker();
        let entry = linker
            .link(&key(), EntryDraft::message(Role::User, "hello"))
            .unwrap();
        assert_eq!(entry.prev_hash, GENESIS_HASH);
        assert_eq!(entry.hash, ChainLink::compute(GENESIS_HASH, "hello").hash);
        assert_eq!(entry.index, 0);
    }

    #[test]
    fn identical_payloads_get_distinct_hashes() {
        let linker = linker();
        let first = linker
            .link(&key(), EntryDraft::message(Role::User, "same"))
            .unwrap();
        let second = linker
            .link(&key(), EntryDraft::message(Role::User, "same"))
            .unwrap();
        assert_eq!(second.prev_hash, first.hash);
        assert_ne!(second.hash, first.hash);
        assert!(second.created_at >= first.created_at);
    }

    #[test]
    fn preview_matches_next_link() {
        let linker = linker();
        linker
            .link(&key(), EntryDraft::message(Role::User, "a"))
            .unwrap();
        let preview = linker.preview(&key(), "b").unwrap();
        let entry = linker
            .link(&key(), EntryDraft::message(Role::Assistant, "b"))
            .unwrap();
        assert_eq!(preview.prev, entry.prev_hash);
        assert_eq!(preview.hash, entry.hash);
    }

    #[test]
    fn anchored_link_extends_the_tail_at_that_time() {
        let linker = linker();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let first = linker
            .link_at(&key(), t0, EntryDraft::message(Role::User, "q"))
            .unwrap();
        let tool = linker
            .link_at(
                &key(),
                t0 + ChronoDuration::seconds(1),
                EntryDraft::tool_result("search", "{}"),
            )
            .unwrap();
        assert_eq!(tool.prev_hash, first.hash);
        assert_eq!(tool.created_at, t0 + ChronoDuration::seconds(1));
    }

    #[test]
    fn anchoring_before_later_entries_is_refused() {
        let linker = linker();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        linker
            .link_at(&key(), t0, EntryDraft::message(Role::User, "a"))
            .unwrap();
        linker
            .link_at(
                &key(),
                t0 + ChronoDuration::seconds(10),
                EntryDraft::message(Role::User, "b"),
            )
            .unwrap();
        let err = linker
            .link_at(
                &key(),
                t0 + ChronoDuration::seconds(5),
                EntryDraft::message(Role::User, "c"),
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::AnchorBehindTail { .. }));
        assert_eq!(linker.store().read_chain(&key()).unwrap().len(), 2);
    }

    /// Store whose first `busy` appends fail transiently, or whose appends
    /// always conflict.
    struct FlakyStore {
        inner: MemoryChainStore,
        busy: u32,
        always_conflict: bool,
        appends: AtomicU32,
    }

    impl FlakyStore {
        fn new(busy: u32, always_conflict: bool) -> Self {
            Self {
                inner: MemoryChainStore::new(),
                busy,
                always_conflict,
                appends: AtomicU32::new(0),
            }
        }
    }

    impl ChainStore for FlakyStore {
        fn tail(
            &self,
            key: &ConversationKey,
            at: Option<DateTime<Utc>>,
        ) -> Result<Option<ChainTail>, LedgerError> {
            self.inner.tail(key, at)
        }

        fn append(&self, entry: &NewEntry) -> Result<AppendOutcome, LedgerError> {
            let n = self.appends.fetch_add(1, Ordering::SeqCst);
            if self.always_conflict {
                return Ok(AppendOutcome::Conflict { current: None });
            }
            if n < self.busy {
                return Err(LedgerError::Busy("database is locked".into()));
            }
            self.inner.append(entry)
        }

        fn read_chain(&self, key: &ConversationKey) -> Result<Vec<Entry>, LedgerError> {
            self.inner.read_chain(key)
        }

        fn scan_timeline(
            &self,
            key: &ConversationKey,
            visit: &mut dyn FnMut(TimelineRow) -> ControlFlow<()>,
        ) -> Result<(), LedgerError> {
            self.inner.scan_timeline(key, visit)
        }

        fn conversations(&self) -> Result<Vec<ConversationKey>, LedgerError> {
            self.inner.conversations()
        }
    }

    #[test]
    fn busy_store_is_retried() {
        let store = Arc::new(FlakyStore::new(2, false));
        let linker = ChainLinker::new(Arc::clone(&store), config());
        let entry = linker
            .link(&key(), EntryDraft::message(Role::User, "x"))
            .unwrap();
        assert_eq!(entry.prev_hash, GENESIS_HASH);
        assert_eq!(store.appends.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn persistent_conflict_exhausts_the_budget() {
        let store = Arc::new(FlakyStore::new(0, true));
        let linker = ChainLinker::new(Arc::clone(&store), config());
        let err = linker
            .link(&key(), EntryDraft::message(Role::User, "x"))
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::LinkContention { attempts: 4, .. }
        ));
        assert_eq!(store.appends.load(Ordering::SeqCst), 4);
    }
}
