// src/commands/mod.rs
//! Command handlers for the eden CLI

mod debug;
mod start;
mod status;
mod stop;

pub use debug::{cmd_debug_getattr, cmd_debug_unit_name};
pub use start::cmd_start;
pub use status::cmd_status;
pub use stop::cmd_stop;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Absolute eden state directory from `--config-dir`, or the default
pub fn resolve_eden_dir(config_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match config_dir {
        Some(dir) => dir.to_path_buf(),
        None => eden::config::default_config_dir()?,
    };
    if dir.is_absolute() {
        return Ok(dir);
    }
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    Ok(cwd.join(dir))
}

/// Exit code mirroring a child's exit status
pub fn exit_code_for(status: std::process::ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        (None, Some(signal)) => ExitCode::from(u8::try_from(128 + signal).unwrap_or(1)),
        (None, None) => ExitCode::FAILURE,
    }
}
