//! Chain persistence.
//!
//! [`ChainStore`] is the narrow contract the linker, verifier and exporter
//! work against. Its `append` is a conditional write: it only lands when the
//! conversation's tail is still the one the new link was computed from, which
//! is what keeps concurrent appenders from forking a chain.
//!
//! [`SqliteChainStore`] is the durable implementation.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use javelin_types::{ConversationKey, LedgerError};

use crate::entry::{Entry, NewEntry, TimelineRow, GENESIS_HASH};
use crate::parse_helpers::{parse_micros, parse_text};

/// The latest entry of a conversation, as seen by a tail read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTail {
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub index: usize,
}

/// Result of a conditional append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(Entry),
    /// The tail moved since the link was computed. `current` is the tail at
    /// the time of the attempt (`None` for an empty conversation).
    Conflict { current: Option<ChainTail> },
}

/// Keyed append/read store for conversation chains.
pub trait ChainStore: Send + Sync {
    /// Latest entry in creation order, optionally bounded to `created_at <= at`.
    fn tail(
        &self,
        key: &ConversationKey,
        at: Option<DateTime<Utc>>,
    ) -> Result<Option<ChainTail>, LedgerError>;

    /// Append `entry` if the conversation's tail hash (or [`GENESIS_HASH`] when
    /// empty) still equals `entry.link.prev`.
    ///
    /// Fails with [`LedgerError::AnchorBehindTail`] when the tail matches but
    /// `entry.created_at` would sort before it.
    fn append(&self, entry: &NewEntry) -> Result<AppendOutcome, LedgerError>;

    /// Every entry of the conversation in creation order, indexed from 0.
    fn read_chain(&self, key: &ConversationKey) -> Result<Vec<Entry>, LedgerError>;

    /// One ordered pass over the conversation's timeline. Stops as soon as
    /// `visit` breaks.
    fn scan_timeline(
        &self,
        key: &ConversationKey,
        visit: &mut dyn FnMut(TimelineRow) -> ControlFlow<()>,
    ) -> Result<(), LedgerError>;

    /// All conversations that have at least one entry.
    fn conversations(&self) -> Result<Vec<ConversationKey>, LedgerError>;
}

/// Shared precondition check for conditional appends.
pub(crate) fn check_append(
    entry: &NewEntry,
    tail: Option<&ChainTail>,
) -> Result<bool, LedgerError> {
    let current = tail.map_or(GENESIS_HASH, |t| t.hash.as_str());
    if current != entry.link.prev {
        return Ok(false);
    }
    if let Some(tail) = tail {
        if entry.created_at < tail.created_at {
            return Err(LedgerError::AnchorBehindTail {
                conversation: entry.key.to_string(),
                at: entry.created_at.to_rfc3339(),
                tail_at: tail.created_at.to_rfc3339(),
            });
        }
    }
    Ok(true)
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS audit_chain (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        conversation_id TEXT NOT NULL,
        created_at_us INTEGER NOT NULL,
        kind TEXT NOT NULL,
        role TEXT NOT NULL,
        step_id TEXT,
        seq INTEGER,
        state TEXT,
        tool_name TEXT,
        prev_hash TEXT NOT NULL,
        hash TEXT NOT NULL,
        canonical TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_chain_order
        ON audit_chain(user_id, conversation_id, created_at_us, id);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_chain_prev
        ON audit_chain(user_id, conversation_id, prev_hash);";

const ENTRY_COLUMNS: &str = "id, created_at_us, kind, role, step_id, seq, state, tool_name, \
     prev_hash, hash, canonical";

const TIMELINE_COLUMNS: &str = "id, kind, role, step_id, seq, state, created_at_us, prev_hash, hash";

/// How long a connection waits on another writer before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_millis(50);

/// SQLite-backed chain store (WAL mode).
///
/// Appends run in an `IMMEDIATE` transaction, so the tail read and the insert
/// are one unit even across processes sharing the database file. A unique
/// index on `(conversation, prev_hash)` refuses a fork at the storage level.
pub struct SqliteChainStore {
    conn: Mutex<Connection>,
    /// Database file, used to open separate read connections for scans.
    /// `None` for in-memory stores.
    path: Option<PathBuf>,
}

impl SqliteChainStore {
    /// Open (or create) the ledger at `path`.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)
            .map_err(|e| storage_error("failed to open database", e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| storage_error("failed to set WAL mode", e))?;
        let store = Self::init(conn, Some(path.to_path_buf()))?;
        info!(path = %path.display(), "audit chain store opened");
        Ok(store)
    }

    /// A private in-memory ledger.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| storage_error("failed to open in-memory database", e))?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, LedgerError> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| storage_error("failed to set busy timeout", e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| storage_error("failed to create schema", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Storage("ledger connection mutex poisoned".into()))
    }

    /// Total number of entries across all conversations.
    pub fn count(&self) -> Result<usize, LedgerError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM audit_chain", [], |row| row.get(0))
            .map_err(|e| storage_error("failed to count entries", e))?;
        Ok(count as usize)
    }
}

impl ChainStore for SqliteChainStore {
    fn tail(
        &self,
        key: &ConversationKey,
        at: Option<DateTime<Utc>>,
    ) -> Result<Option<ChainTail>, LedgerError> {
        let conn = self.lock()?;
        read_tail(&conn, key, at).map_err(|e| storage_error("failed to read chain tail", e))
    }

    fn append(&self, entry: &NewEntry) -> Result<AppendOutcome, LedgerError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| storage_error("failed to begin append", e))?;

        let tail = read_tail(&tx, &entry.key, None)
            .map_err(|e| storage_error("failed to read chain tail", e))?;
        if !check_append(entry, tail.as_ref())? {
            debug!(conversation = %entry.key, prev = %entry.link.prev, "append conflict");
            return Ok(AppendOutcome::Conflict { current: tail });
        }

        let inserted = tx.execute(
            "INSERT INTO audit_chain (user_id, conversation_id, created_at_us, kind, role,
                 step_id, seq, state, tool_name, prev_hash, hash, canonical)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.key.user_id,
                entry.key.conversation_id,
                entry.created_at.timestamp_micros(),
                entry.kind.as_str(),
                entry.role.as_str(),
                entry.step_id,
                entry.seq,
                entry.state,
                entry.tool_name,
                entry.link.prev,
                entry.link.hash,
                entry.link.canonical,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                debug!(conversation = %entry.key, "append refused by fork guard");
                return Ok(AppendOutcome::Conflict { current: tail });
            }
            Err(e) => return Err(storage_error("failed to insert entry", e)),
        }
        let id = tx.last_insert_rowid();
        tx.commit()
            .map_err(|e| storage_error("failed to commit append", e))?;

        Ok(AppendOutcome::Appended(Entry {
            index: tail.map_or(0, |t| t.index + 1),
            id,
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
        }))
    }

    fn read_chain(&self, key: &ConversationKey) -> Result<Vec<Entry>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM audit_chain
                 WHERE user_id = ?1 AND conversation_id = ?2
                 ORDER BY created_at_us ASC, id ASC"
            ))
            .map_err(|e| storage_error("failed to prepare chain query", e))?;

        let mut index = 0;
        let rows = stmt
            .query_map(params![key.user_id, key.conversation_id], |row| {
                let entry = Entry {
                    index,
                    id: row.get(0)?,
                    key: key.clone(),
                    created_at: parse_micros(row.get(1)?, 1)?,
                    kind: parse_text(&row.get::<_, String>(2)?, 2)?,
                    role: parse_text(&row.get::<_, String>(3)?, 3)?,
                    step_id: row.get(4)?,
                    seq: row.get(5)?,
                    state: row.get(6)?,
                    tool_name: row.get(7)?,
                    prev_hash: row.get(8)?,
                    hash: row.get(9)?,
                    canonical: row.get(10)?,
                };
                index += 1;
                Ok(entry)
            })
            .map_err(|e| storage_error("failed to query chain", e))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| storage_error("failed to read chain row", e))
    }

    fn scan_timeline(
        &self,
        key: &ConversationKey,
        visit: &mut dyn FnMut(TimelineRow) -> ControlFlow<()>,
    ) -> Result<(), LedgerError> {
        // File-backed ledgers scan on their own connection so a slow export
        // consumer never holds up appends.
        let Some(path) = &self.path else {
            // An in-memory ledger has a single connection. Snapshot the rows
            // so the visitor runs without the lock and may call back in.
            let mut rows = Vec::new();
            scan_rows(&*self.lock()?, key, &mut |row| {
                rows.push(row);
                ControlFlow::Continue(())
            })
            .map_err(|e| storage_error("failed to scan timeline", e))?;
            for row in rows {
                if visit(row).is_break() {
                    break;
                }
            }
            return Ok(());
        };
        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| storage_error("failed to open read connection", e))?;
        scan_rows(&reader, key, visit).map_err(|e| storage_error("failed to scan timeline", e))
    }

    fn conversations(&self) -> Result<Vec<ConversationKey>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT user_id, conversation_id FROM audit_chain
                 ORDER BY user_id, conversation_id",
            )
            .map_err(|e| storage_error("failed to prepare conversation query", e))?;
        let rows = stmt
            .query_map([], |row| Ok(ConversationKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| storage_error("failed to list conversations", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| storage_error("failed to read conversation row", e))
    }
}

fn read_tail(
    conn: &Connection,
    key: &ConversationKey,
    at: Option<DateTime<Utc>>,
) -> rusqlite::Result<Option<ChainTail>> {
    let bound = at.map_or(i64::MAX, |at| at.timestamp_micros());
    let latest = conn
        .query_row(
            "SELECT hash, created_at_us, id FROM audit_chain
             WHERE user_id = ?1 AND conversation_id = ?2 AND created_at_us <= ?3
             ORDER BY created_at_us DESC, id DESC LIMIT 1",
            params![key.user_id, key.conversation_id, bound],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((hash, created_at_us, id)) = latest else {
        return Ok(None);
    };
    let before: i64 = conn.query_row(
        "SELECT COUNT(*) FROM audit_chain
         WHERE user_id = ?1 AND conversation_id = ?2
           AND (created_at_us < ?3 OR (created_at_us = ?3 AND id < ?4))",
        params![key.user_id, key.conversation_id, created_at_us, id],
        |row| row.get(0),
    )?;

    Ok(Some(ChainTail {
        hash,
        created_at: parse_micros(created_at_us, 1)?,
        index: before as usize,
    }))
}

fn scan_rows(
    conn: &Connection,
    key: &ConversationKey,
    visit: &mut dyn FnMut(TimelineRow) -> ControlFlow<()>,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TIMELINE_COLUMNS} FROM audit_chain
         WHERE user_id = ?1 AND conversation_id = ?2
         ORDER BY created_at_us ASC, id ASC"
    ))?;
    let mut rows = stmt.query(params![key.user_id, key.conversation_id])?;
    while let Some(row) = rows.next()? {
        let timeline = TimelineRow {
            id: row.get(0)?,
            kind: parse_text(&row.get::<_, String>(1)?, 1)?,
            role: parse_text(&row.get::<_, String>(2)?, 2)?,
            step_id: row.get(3)?,
            seq: row.get(4)?,
            state: row.get(5)?,
            created_at: parse_micros(row.get(6)?, 6)?,
            prev_hash: row.get(7)?,
            hash: row.get(8)?,
        };
        if visit(timeline).is_break() {
            break;
        }
    }
    Ok(())
}

/// Map a SQLite failure, keeping lock contention distinguishable.
fn storage_error(context: &str, e: rusqlite::Error) -> LedgerError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            LedgerError::Busy(format!("{context}: {e}"))
        }
        _ => LedgerError::Storage(format!("{context}: {e}")),
    }
}
