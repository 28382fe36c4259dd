//! Configuration types for the audit ledger.
//!
//! [`LedgerConfig`] is the top-level configuration loaded from
//! `javelin.toml`. It points at the SQLite ledger and tunes the chain
//! linker's retry budget and the export stream's buffer.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::LedgerError;

/// Default configuration filename.
pub const CONFIG_FILENAME: &str = "javelin.toml";

/// Default SQLite ledger filename.
pub const LEDGER_FILENAME: &str = "audit.db";

/// Retry budget for appending to a chain under contention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Maximum number of read-tail/append attempts before giving up.
    pub max_attempts: u32,
    /// Linear backoff step between attempts, in milliseconds.
    pub backoff_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_attempts: 32,
            backoff_ms: 2,
        }
    }
}

/// Export stream tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Rows buffered between the store read and the consumer. When the
    /// buffer is full the read waits for the consumer.
    pub channel_capacity: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

/// Top-level configuration for a ledger instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Path to the SQLite audit ledger database.
    pub ledger_path: PathBuf,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from(LEDGER_FILENAME),
            link: LinkConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, LedgerError> {
        let config: Self =
            toml::from_str(content).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, LedgerError> {
        toml::to_string_pretty(self).map_err(|e| LedgerError::Config(e.to_string()))
    }

    /// Default configuration with the ledger placed under `base_dir`.
    pub fn default_for(base_dir: &Path) -> Self {
        Self {
            ledger_path: base_dir.join(LEDGER_FILENAME),
            ..Self::default()
        }
    }

    /// Reject values that would make the linker or exporter unusable.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.ledger_path.as_os_str().is_empty() {
            return Err(LedgerError::Config("ledger_path must not be empty".into()));
        }
        if self.link.max_attempts == 0 {
            return Err(LedgerError::Config(
                "link.max_attempts must be at least 1".into(),
            ));
        }
        if self.export.channel_capacity == 0 {
            return Err(LedgerError::Config(
                "export.channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
