//! Chain verification with localized diagnostics.
//!
//! The verifier replays a conversation in creation order and checks each
//! entry's `prev_hash` against its predecessor and its `hash` against the
//! stored payload. Findings are collected into a [`VerifyReport`]; only a
//! failure to read the chain is an error.
//!
//! A single tampered entry yields a single issue. The next entry's expected
//! `prev_hash` is the predecessor's *stored* hash, and when that stored hash
//! itself failed its check, the predecessor's recomputed hash is accepted as
//! well, since that is what the successor was linked against at write time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use javelin_types::{ConversationKey, LedgerError, Role};

use crate::entry::{Entry, GENESIS_HASH};
use crate::store::ChainStore;

pub const REASON_PREV_MISMATCH: &str = "prev-mismatch";
pub const REASON_HASH_MISMATCH: &str = "hash-mismatch";
pub const REASON_MISSING_CANONICAL: &str = "missing-canonical";

/// One deviation found while walking a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyIssue {
    pub index: usize,
    pub entry_id: i64,
    pub created_at: DateTime<Utc>,
    pub role: Role,
    pub step_id: Option<String>,
    pub seq: Option<i64>,
    pub stored_prev: String,
    pub expected_prev: String,
    pub stored_hash: String,
    /// `None` when the entry has no stored payload to recompute from.
    pub expected_hash: Option<String>,
    pub prev_matches: bool,
    pub hash_matches: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub conversation: ConversationKey,
    pub total: usize,
    pub ok: usize,
    pub bad: usize,
    pub first_bad_index: Option<usize>,
    pub first_bad: Option<VerifyIssue>,
    /// Stored hash of the last entry, or [`GENESIS_HASH`] for an empty chain.
    pub latest_hash: String,
    pub issues: Vec<VerifyIssue>,
}

impl VerifyReport {
    pub fn is_valid(&self) -> bool {
        self.bad == 0
    }
}

/// Verify `entries`, which must be one conversation's chain in creation order.
pub fn verify_entries(key: &ConversationKey, entries: &[Entry]) -> VerifyReport {
    let mut expected_prev = GENESIS_HASH.to_string();
    // Recomputed hash of the predecessor, kept only when its stored hash failed.
    let mut recomputed_prev: Option<String> = None;
    let mut issues = Vec::new();

    for entry in entries {
        let prev_matches = entry.prev_hash == expected_prev
            || recomputed_prev.as_deref() == Some(entry.prev_hash.as_str());
        let basis = if prev_matches {
            entry.prev_hash.as_str()
        } else {
            expected_prev.as_str()
        };
        let expected_hash = entry.recompute_hash(basis);
        let hash_matches = expected_hash.as_deref() == Some(entry.hash.as_str());

        if !prev_matches || !hash_matches {
            issues.push(VerifyIssue {
                index: entry.index,
                entry_id: entry.id,
                created_at: entry.created_at,
                role: entry.role,
                step_id: entry.step_id.clone(),
                seq: entry.seq,
                stored_prev: entry.prev_hash.clone(),
                expected_prev: expected_prev.clone(),
                stored_hash: entry.hash.clone(),
                expected_hash: expected_hash.clone(),
                prev_matches,
                hash_matches,
                reason: reason(prev_matches, hash_matches, expected_hash.is_some()),
            });
        }

        recomputed_prev = if hash_matches { None } else { expected_hash };
        expected_prev = entry.hash.clone();
    }

    let total = entries.len();
    let bad = issues.len();
    VerifyReport {
        conversation: key.clone(),
        total,
        ok: total - bad,
        bad,
        first_bad_index: issues.first().map(|i| i.index),
        first_bad: issues.first().cloned(),
        latest_hash: expected_prev,
        issues,
    }
}

fn reason(prev_matches: bool, hash_matches: bool, has_canonical: bool) -> String {
    let mut parts = Vec::with_capacity(2);
    if !prev_matches {
        parts.push(REASON_PREV_MISMATCH);
    }
    if !has_canonical {
        parts.push(REASON_MISSING_CANONICAL);
    } else if !hash_matches {
        parts.push(REASON_HASH_MISMATCH);
    }
    parts.join("+")
}

/// Verifies chains read from a store.
pub struct Verifier<S> {
    store: Arc<S>,
}

impl<S: ChainStore> Verifier<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn verify(&self, key: &ConversationKey) -> Result<VerifyReport, LedgerError> {
        let entries = self.store.read_chain(key)?;
        let report = verify_entries(key, &entries);
        if report.is_valid() {
            info!(conversation = %key, total = report.total, "chain verified");
        } else {
            warn!(
                conversation = %key,
                total = report.total,
                bad = report.bad,
                first_bad_index = ?report.first_bad_index,
                "chain verification found issues"
            );
        }
        Ok(report)
    }

    /// The hash the next append will link to.
    pub fn tail_hash(&self, key: &ConversationKey) -> Result<String, LedgerError> {
        Ok(self
            .store
            .tail(key, None)?
            .map_or_else(|| GENESIS_HASH.to_string(), |tail| tail.hash))
    }
}
