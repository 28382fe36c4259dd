pub mod canonical;
pub mod chain;
pub mod digest;
pub mod entry;
pub mod export;
pub mod memory;
mod parse_helpers;
pub mod payload;
pub mod store;
pub mod verify;

pub use canonical::{canonicalize, count_fence_markers, Canonicalizer};
pub use chain::ChainLinker;
pub use entry::{ChainLink, Entry, EntryDraft, NewEntry, TimelineRow, GENESIS_HASH};
pub use export::{ExportFormat, ExportStream, Exporter, RowStream};
pub use memory::MemoryChainStore;
pub use payload::{MessageAudit, ToolAudit};
pub use store::{AppendOutcome, ChainStore, ChainTail, SqliteChainStore};
pub use verify::{verify_entries, VerifyIssue, VerifyReport, Verifier};
