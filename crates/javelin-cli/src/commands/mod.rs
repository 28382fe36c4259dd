//! CLI command implementations for the `javelin` binary.

pub mod audit;
pub mod config;
pub mod text;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

use javelin_types::{ConfigLoader, EffectiveConfig, LedgerConfig};

/// Load the layered configuration, honoring an explicit `--config` file.
pub(crate) fn load_effective(path: Option<&Path>) -> Result<EffectiveConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::new().with_file(path.to_path_buf()),
        None => ConfigLoader::new(),
    };
    loader.load().context("failed to load configuration")
}

pub(crate) fn load_config(path: Option<&Path>) -> Result<LedgerConfig> {
    Ok(load_effective(path)?.config)
}

/// Read all of `file`, or stdin when no file is given.
pub(crate) fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            Ok(buf)
        }
    }
}
