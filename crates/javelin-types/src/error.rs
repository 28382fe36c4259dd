//! Error type shared across all Javelin crates.

/// Errors that can occur in the audit ledger.
///
/// Integrity findings (a broken link, a mismatched digest) are never errors;
/// they are reported through a verification report. These variants cover the
/// infrastructure around the chain: storage, contention, payload encoding,
/// export and configuration.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("audit storage error: {0}")]
    Storage(String),

    #[error("audit storage busy: {0}")]
    Busy(String),

    #[error("could not extend chain for {conversation} after {attempts} attempts")]
    LinkContention { conversation: String, attempts: u32 },

    #[error(
        "cannot anchor entry for {conversation} at {at}: chain already extends to {tail_at}"
    )]
    AnchorBehindTail {
        conversation: String,
        at: String,
        tail_at: String,
    },

    #[error("audit payload encoding error: {0}")]
    Encoding(String),

    #[error("audit export error: {0}")]
    Export(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// Whether retrying the operation against a fresh tail read can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Busy(_))
    }
}
