//! Javelin audit integrity: canonicalization, hash-chained conversation
//! ledger, verification, and export.
//!
//! This facade re-exports the workspace crates so downstream code can depend
//! on a single package.

pub use javelin_ledger as ledger;
pub use javelin_types as types;
