// src/commands/debug.rs
//! `eden debug` subcommands

use anyhow::{Context, Result};
use eden::service::EdenFsUnit;
use std::path::Path;

pub fn cmd_debug_unit_name(eden_dir: &Path) -> Result<()> {
    let unit = EdenFsUnit::for_eden_dir(eden_dir)?;
    println!("{}", unit.unit_name());
    Ok(())
}

pub fn cmd_debug_getattr(path: &Path) -> Result<()> {
    let attr = eden::nfs::getattr(path)
        .with_context(|| format!("Failed to read attributes of {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&attr)?);
    Ok(())
}
