//! Chain entries: what callers hand to the linker, what a store appends, and
//! what comes back out.
//!
//! Each entry links to its predecessor in the same conversation through
//! `prev_hash`; its `hash` covers only that link and the canonical payload.
//! Role, step and sequence fields are informational and never hashed.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use javelin_types::{ConversationKey, EntryKind, Role};

use crate::digest::link_digest;

/// `prev_hash` of the first entry in every conversation. Never a hex digest.
pub const GENESIS_HASH: &str = "genesis";

/// The triple persisted for one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainLink {
    pub prev: String,
    pub hash: String,
    pub canonical: String,
}

impl ChainLink {
    /// Link `canonical` onto the entry whose hash is `prev`.
    pub fn compute(prev: impl Into<String>, canonical: impl Into<String>) -> Self {
        let prev = prev.into();
        let canonical = canonical.into();
        let hash = link_digest(&prev, &canonical);
        Self {
            prev,
            hash,
            canonical,
        }
    }
}

/// Caller-supplied fields of an entry that is about to be linked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDraft {
    pub kind: EntryKind,
    pub role: Role,
    pub step_id: Option<String>,
    pub seq: Option<i64>,
    pub state: Option<String>,
    pub tool_name: Option<String>,
    pub canonical: String,
}

impl EntryDraft {
    pub fn message(role: Role, canonical: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Message,
            role,
            step_id: None,
            seq: None,
            state: None,
            tool_name: None,
            canonical: canonical.into(),
        }
    }

    pub fn tool_result(tool_name: impl Into<String>, canonical: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::ToolResult,
            role: Role::Tool,
            step_id: None,
            seq: None,
            state: None,
            tool_name: Some(tool_name.into()),
            canonical: canonical.into(),
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_seq(mut self, seq: i64) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }
}

/// A fully linked entry ready for a conditional append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub key: ConversationKey,
    pub created_at: DateTime<Utc>,
    pub kind: EntryKind,
    pub role: Role,
    pub step_id: Option<String>,
    pub seq: Option<i64>,
    pub state: Option<String>,
    pub tool_name: Option<String>,
    pub link: ChainLink,
}

impl NewEntry {
    pub fn new(
        key: ConversationKey,
        created_at: DateTime<Utc>,
        draft: EntryDraft,
        link: ChainLink,
    ) -> Self {
        Self {
            key,
            created_at: truncate_micros(created_at),
            kind: draft.kind,
            role: draft.role,
            step_id: draft.step_id,
            seq: draft.seq,
            state: draft.state,
            tool_name: draft.tool_name,
            link,
        }
    }
}

/// A persisted entry, as read back in creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Position in the conversation's creation order, assigned on read.
    pub index: usize,
    /// Store-assigned record id; breaks `created_at` ties.
    pub id: i64,
    pub key: ConversationKey,
    pub created_at: DateTime<Utc>,
    pub kind: EntryKind,
    pub role: Role,
    pub step_id: Option<String>,
    pub seq: Option<i64>,
    pub state: Option<String>,
    pub tool_name: Option<String>,
    pub prev_hash: String,
    pub hash: String,
    /// The exact text that was hashed. Rows written before payloads were
    /// stored alongside the hash have none.
    pub canonical: Option<String>,
}

impl Entry {
    /// Recompute this entry's hash against `prev`, if the payload is present.
    pub fn recompute_hash(&self, prev: &str) -> Option<String> {
        self.canonical
            .as_deref()
            .map(|canonical| link_digest(prev, canonical))
    }

    pub fn timeline_row(&self) -> TimelineRow {
        TimelineRow {
            id: self.id,
            kind: self.kind,
            role: self.role,
            step_id: self.step_id.clone(),
            seq: self.seq,
            state: self.state.clone(),
            created_at: self.created_at,
            prev_hash: self.prev_hash.clone(),
            hash: self.hash.clone(),
        }
    }
}

/// One exported timeline row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineRow {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub role: Role,
    pub step_id: Option<String>,
    pub seq: Option<i64>,
    pub state: Option<String>,
    pub created_at: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

/// Timestamps are stored with microsecond resolution.
pub fn truncate_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}
