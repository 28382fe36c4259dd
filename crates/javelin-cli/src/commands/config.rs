use std::path::Path;

use anyhow::{Context, Result};

use crate::commands::load_effective;

/// Run `javelin config`: the merged configuration, then one line per field
/// naming the layer that set it.
pub fn show(path: Option<&Path>) -> Result<()> {
    let effective = load_effective(path)?;
    let rendered = effective
        .config
        .to_toml()
        .context("failed to render configuration")?;
    print!("{rendered}");

    let mut sources: Vec<_> = effective.sources.iter().collect();
    sources.sort_by(|a, b| a.0.cmp(b.0));
    println!();
    println!("# Sources:");
    for (field, source) in sources {
        println!("#   {field:<24} {source}");
    }
    Ok(())
}
