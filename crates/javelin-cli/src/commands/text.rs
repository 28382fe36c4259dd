use std::path::Path;

use anyhow::Result;

use javelin_ledger::Canonicalizer;

use crate::commands::read_input;

/// Run `javelin canonicalize [FILE]`.
pub fn canonicalize(file: Option<&Path>) -> Result<()> {
    let input = read_input(file)?;
    print!("{}", Canonicalizer.canonicalize(&input));
    Ok(())
}

/// Run `javelin fingerprint [FILE]`.
pub fn fingerprint(file: Option<&Path>) -> Result<()> {
    let input = read_input(file)?;
    println!("{}", Canonicalizer.fingerprint(&input));
    Ok(())
}
