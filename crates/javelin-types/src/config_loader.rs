//! Layered configuration loading.
//!
//! The priority chain (later overrides earlier):
//! 1. Built-in defaults ([`LedgerConfig::default()`])
//! 2. A TOML config file, if one is given or `./javelin.toml` exists
//! 3. `JAVELIN_*` environment variables
//!
//! Each field in the final [`EffectiveConfig`] is annotated with the
//! [`ConfigSource`] that determined its value.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::{LedgerConfig, CONFIG_FILENAME};
use crate::LedgerError;

/// Maximum config file size in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Where a configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    BuiltinDefault,
    File(PathBuf),
    EnvVar(String),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::BuiltinDefault => write!(f, "built-in default"),
            ConfigSource::File(p) => write!(f, "file: {}", p.display()),
            ConfigSource::EnvVar(name) => write!(f, "env var: {name}"),
        }
    }
}

/// The merged config plus provenance for each field.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub config: LedgerConfig,
    /// Dot-separated field path -> the source that determined its value.
    pub sources: HashMap<String, ConfigSource>,
}

/// Known environment variable mappings.
struct EnvMapping {
    env_var: &'static str,
    toml_path: &'static [&'static str],
    kind: EnvKind,
}

#[derive(Clone, Copy)]
enum EnvKind {
    Path,
    Integer,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        env_var: "JAVELIN_LEDGER_PATH",
        toml_path: &["ledger_path"],
        kind: EnvKind::Path,
    },
    EnvMapping {
        env_var: "JAVELIN_LINK_MAX_ATTEMPTS",
        toml_path: &["link", "max_attempts"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "JAVELIN_EXPORT_CHANNEL_CAPACITY",
        toml_path: &["export", "channel_capacity"],
        kind: EnvKind::Integer,
    },
];

/// Layered configuration loader.
pub struct ConfigLoader {
    file_path: Option<PathBuf>,
    env_override: Option<HashMap<String, String>>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file_path: None,
            env_override: None,
        }
    }

    /// Load from an explicit config file. Unlike the implicit
    /// `./javelin.toml`, an explicit file must exist.
    #[must_use]
    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    /// Read environment overrides from `vars` instead of the process
    /// environment.
    #[must_use]
    pub fn with_env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env_override = Some(vars);
        self
    }

    /// Load and merge configuration from all sources.
    pub fn load(&self) -> Result<EffectiveConfig, LedgerError> {
        let mut sources = HashMap::new();

        let mut merged = toml::Value::try_from(LedgerConfig::default())
            .map_err(|e| LedgerError::Config(format!("failed to serialize defaults: {e}")))?;
        record_sources(&merged, &mut sources, &ConfigSource::BuiltinDefault, "");

        let file = match &self.file_path {
            Some(path) => {
                if !path.exists() {
                    return Err(LedgerError::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                Some(path.clone())
            }
            None => {
                let implicit = PathBuf::from(CONFIG_FILENAME);
                implicit.exists().then_some(implicit)
            }
        };

        if let Some(path) = file {
            let content = read_config_file(&path)?;
            let layer: toml::Value = toml::from_str(&content).map_err(|e| {
                LedgerError::Config(format!("invalid config file {}: {e}", path.display()))
            })?;
            deep_merge(&mut merged, &layer);
            record_sources(&layer, &mut sources, &ConfigSource::File(path), "");
        }

        self.apply_env_overrides(&mut merged, &mut sources)?;

        let config: LedgerConfig = merged
            .try_into()
            .map_err(|e| LedgerError::Config(format!("failed to parse merged config: {e}")))?;
        config.validate()?;

        Ok(EffectiveConfig { config, sources })
    }

    fn env_var(&self, name: &str) -> Option<String> {
        match &self.env_override {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    fn apply_env_overrides(
        &self,
        merged: &mut toml::Value,
        sources: &mut HashMap<String, ConfigSource>,
    ) -> Result<(), LedgerError> {
        for mapping in ENV_MAPPINGS {
            let Some(raw) = self.env_var(mapping.env_var) else {
                continue;
            };
            if raw.chars().any(|c| c.is_control()) {
                return Err(LedgerError::Config(format!(
                    "environment variable {} contains control characters",
                    mapping.env_var
                )));
            }
            let value = match mapping.kind {
                EnvKind::Path => toml::Value::String(raw),
                EnvKind::Integer => {
                    let n: i64 = raw.trim().parse().map_err(|_| {
                        LedgerError::Config(format!(
                            "environment variable {} must be an integer, got {raw:?}",
                            mapping.env_var
                        ))
                    })?;
                    toml::Value::Integer(n)
                }
            };
            set_nested_value(merged, mapping.toml_path, value);
            sources.insert(
                mapping.toml_path.join("."),
                ConfigSource::EnvVar(mapping.env_var.to_string()),
            );
        }
        Ok(())
    }
}

/// Read a config file with a size limit and a null-byte check.
fn read_config_file(path: &Path) -> Result<String, LedgerError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        LedgerError::Config(format!("cannot read config file {}: {e}", path.display()))
    })?;

    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(LedgerError::Config(format!(
            "config file {} exceeds maximum size of {MAX_CONFIG_FILE_SIZE} bytes",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        LedgerError::Config(format!("cannot read config file {}: {e}", path.display()))
    })?;

    if content.contains('\0') {
        return Err(LedgerError::Config(format!(
            "config file {} contains null bytes",
            path.display()
        )));
    }

    Ok(content)
}

/// Deep-merge `overlay` into `base`. Tables merge field-by-field; anything
/// else is replaced.
fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn record_sources(
    layer: &toml::Value,
    sources: &mut HashMap<String, ConfigSource>,
    source: &ConfigSource,
    prefix: &str,
) {
    if let toml::Value::Table(table) = layer {
        for (key, value) in table {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            sources.insert(path.clone(), source.clone());
            record_sources(value, sources, source, &path);
        }
    }
}

fn set_nested_value(root: &mut toml::Value, path: &[&str], value: toml::Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = root;
    for segment in parents {
        let toml::Value::Table(table) = current else {
            return;
        };
        current = table
            .entry(segment.to_string())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    if let toml::Value::Table(table) = current {
        table.insert(last.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn file_with_only_defaults_yields_defaults() {
        let loaded = ConfigLoader::new()
            .with_file(write_config("ledger_path = \"audit.db\"\n").path().to_path_buf())
            .with_env_vars(no_env())
            .load()
            .unwrap();
        assert_eq!(loaded.config, LedgerConfig::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let file = write_config(
            "ledger_path = \"/srv/ledger.db\"\n[link]\nmax_attempts = 5\n",
        );
        let loaded = ConfigLoader::new()
            .with_file(file.path().to_path_buf())
            .with_env_vars(no_env())
            .load()
            .unwrap();
        assert_eq!(loaded.config.ledger_path, PathBuf::from("/srv/ledger.db"));
        assert_eq!(loaded.config.link.max_attempts, 5);
        assert_eq!(loaded.config.link.backoff_ms, 2);
        assert_eq!(
            loaded.sources.get("link.max_attempts"),
            Some(&ConfigSource::File(file.path().to_path_buf()))
        );
        assert_eq!(
            loaded.sources.get("export.channel_capacity"),
            Some(&ConfigSource::BuiltinDefault)
        );
    }

    #[test]
    fn env_overrides_file() {
        let file = write_config("ledger_path = \"/srv/ledger.db\"\n");
        let env = HashMap::from([
            ("JAVELIN_LEDGER_PATH".to_string(), "/tmp/env.db".to_string()),
            ("JAVELIN_EXPORT_CHANNEL_CAPACITY".to_string(), "8".to_string()),
        ]);
        let loaded = ConfigLoader::new()
            .with_file(file.path().to_path_buf())
            .with_env_vars(env)
            .load()
            .unwrap();
        assert_eq!(loaded.config.ledger_path, PathBuf::from("/tmp/env.db"));
        assert_eq!(loaded.config.export.channel_capacity, 8);
        assert_eq!(
            loaded.sources.get("ledger_path"),
            Some(&ConfigSource::EnvVar("JAVELIN_LEDGER_PATH".into()))
        );
    }

    #[test]
    fn non_numeric_env_rejected() {
        let file = write_config("ledger_path = \"/srv/ledger.db\"\n");
        let env = HashMap::from([(
            "JAVELIN_LINK_MAX_ATTEMPTS".to_string(),
            "many".to_string(),
        )]);
        let err = ConfigLoader::new()
            .with_file(file.path().to_path_buf())
            .with_env_vars(env)
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("JAVELIN_LINK_MAX_ATTEMPTS"));
    }

    #[test]
    fn missing_explicit_file_rejected() {
        let err = ConfigLoader::new()
            .with_file(PathBuf::from("/nonexistent/javelin.toml"))
            .with_env_vars(no_env())
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn null_bytes_rejected() {
        let file = write_config("ledger_path = \"a\"\n\0");
        let err = ConfigLoader::new()
            .with_file(file.path().to_path_buf())
            .with_env_vars(no_env())
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("null bytes"));
    }

    #[test]
    fn deep_merge_keeps_sibling_fields() {
        let mut base: toml::Value = toml::from_str("[link]\nmax_attempts = 32\nbackoff_ms = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[link]\nbackoff_ms = 9\n").unwrap();
        deep_merge(&mut base, &overlay);
        assert_eq!(base["link"]["max_attempts"].as_integer(), Some(32));
        assert_eq!(base["link"]["backoff_ms"].as_integer(), Some(9));
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }
}
