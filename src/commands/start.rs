// src/commands/start.rs
//! `eden start`

use super::exit_code_for;
use anyhow::{Context, Result};
use eden::launcher::{self, StartOptions, StartOutcome};
use eden::EdenConfig;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;

/// Start edenfs for `eden_dir`
///
/// A foreground start returns the daemon's own exit status.
pub fn cmd_start(
    eden_dir: &Path,
    foreground: bool,
    allow_root: bool,
    daemon_binary: Option<PathBuf>,
    mut daemon_args: Vec<String>,
) -> Result<ExitCode> {
    let config = EdenConfig::load(eden_dir)
        .with_context(|| format!("Failed to load configuration from {}", eden_dir.display()))?;

    if allow_root {
        daemon_args.insert(0, "--allowRoot".to_string());
    }

    let options = StartOptions {
        eden_dir: eden_dir.to_path_buf(),
        foreground,
        daemon_binary,
        daemon_args,
        experimental_systemd: config.systemd_enabled(),
    };
    debug!("Start options: {:?}", options);

    let mut stdout = std::io::stdout();
    let outcome = launcher::start(&options, &config, &mut stdout)
        .with_context(|| format!("Failed to start edenfs for {}", eden_dir.display()))?;

    Ok(match outcome {
        StartOutcome::Exited(status) => exit_code_for(status),
        StartOutcome::Detached { .. } | StartOutcome::SystemdUnit { .. } => ExitCode::SUCCESS,
    })
}
