//! Core types shared across the Javelin crates.
//!
//! Defines the conversation identity, entry classification, configuration,
//! and the error type used by the audit ledger and CLI.

pub mod config;
pub mod config_loader;
pub mod conversation;
pub mod error;

pub use config::{ExportConfig, LedgerConfig, LinkConfig, CONFIG_FILENAME, LEDGER_FILENAME};
pub use config_loader::{ConfigLoader, ConfigSource, EffectiveConfig};
pub use conversation::{ConversationKey, EntryKind, Role};
pub use error::LedgerError;
